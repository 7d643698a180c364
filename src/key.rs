//! Type identities and registry keys
//!
//! Rust has no runtime reflection, so the container describes types with a
//! small value type, [`TypeDescriptor`]. A descriptor carries the identity
//! used for equality and hashing, a diagnostic name, a [`TypeKind`] that
//! decides whether the container may construct the type, and an optional
//! generic shape (open definition, or closed type with arguments).
//!
//! [`TypeKey`] pairs a descriptor with an optional registration name and is
//! the key of every registry and scope cache.

use crate::error::{DiError, Result};
use crate::provider::AnyArc;
use ahash::RandomState;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

/// Fixed-seed hasher so every map version and every container agree on key hashes.
static KEY_HASHER: Lazy<RandomState> = Lazy::new(|| {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

/// Name of the built-in "collection of T" generic definition.
pub const COLLECTION_DEFINITION: &str = "scoped_injector::Collection";

/// Assembles resolved collection items into one typed collection instance.
pub type Collector = fn(Vec<AnyArc>) -> Result<AnyArc>;

/// What a descriptor is compared and hashed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeIdentity {
    /// A real Rust type (sized or not)
    Type(TypeId),
    /// An open generic type definition, identified by its path
    Definition(&'static str),
    /// A generic parameter placeholder, identified by position
    Parameter(usize),
}

/// Broad category of a type, used to refuse construction of types that
/// have no concrete recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Concrete,
    /// Trait object (`dyn Trait`)
    Interface,
    Abstract,
    Enum,
    /// Function pointer or `dyn Fn*`
    Delegate,
    Primitive,
    GenericDefinition,
    GenericParameter,
}

impl TypeKind {
    /// Only concrete types can be built from a constructor.
    #[inline]
    pub fn is_constructible(self) -> bool {
        matches!(self, TypeKind::Concrete)
    }
}

#[derive(Clone)]
enum GenericShape {
    None,
    Definition { arity: usize },
    Closed(Arc<ClosedGeneric>),
}

struct ClosedGeneric {
    definition: TypeDescriptor,
    arguments: Arc<[TypeDescriptor]>,
    collector: Option<Collector>,
}

/// Runtime description of a type.
///
/// Equality and hashing use the identity only; name, kind and generic
/// shape are carried along for diagnostics and resolution decisions.
#[derive(Clone)]
pub struct TypeDescriptor {
    identity: TypeIdentity,
    name: &'static str,
    kind: TypeKind,
    shape: GenericShape,
}

fn primitive_ids() -> [TypeId; 19] {
    [
        TypeId::of::<bool>(),
        TypeId::of::<char>(),
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
        TypeId::of::<f32>(),
        TypeId::of::<f64>(),
        TypeId::of::<str>(),
        TypeId::of::<String>(),
        TypeId::of::<()>(),
    ]
}

fn classify<T: ?Sized + 'static>() -> TypeKind {
    let id = TypeId::of::<T>();
    if primitive_ids().contains(&id) {
        return TypeKind::Primitive;
    }
    let name = std::any::type_name::<T>();
    if name.starts_with("fn(")
        || name.starts_with("unsafe fn")
        || name.starts_with("extern ")
        || name.starts_with("dyn core::ops::function::Fn")
    {
        TypeKind::Delegate
    } else if name.starts_with("dyn ") {
        TypeKind::Interface
    } else {
        TypeKind::Concrete
    }
}

fn collect_sized<T: Send + Sync + 'static>(items: Vec<AnyArc>) -> Result<AnyArc> {
    let mut out: Vec<Arc<T>> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.downcast::<T>().map_err(|_| {
            DiError::resolve(
                std::any::type_name::<T>(),
                "collection item has an unexpected runtime type",
            )
        })?;
        out.push(item);
    }
    Ok(Arc::new(out) as AnyArc)
}

fn collect_dyn<I: ?Sized + Send + Sync + 'static>(items: Vec<AnyArc>) -> Result<AnyArc> {
    let mut out: Vec<Arc<I>> = Vec::with_capacity(items.len());
    for item in items {
        let handle = item.downcast::<Arc<I>>().map_err(|_| {
            DiError::resolve(
                std::any::type_name::<I>(),
                "collection item is not an interface handle",
            )
        })?;
        out.push(Arc::clone(&*handle));
    }
    Ok(Arc::new(out) as AnyArc)
}

impl TypeDescriptor {
    /// Describe `T`, inferring its kind (primitive, trait object, fn pointer, concrete).
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            identity: TypeIdentity::Type(TypeId::of::<T>()),
            name: std::any::type_name::<T>(),
            kind: classify::<T>(),
            shape: GenericShape::None,
        }
    }

    /// Describe a trait object type such as `dyn Engine`.
    pub fn interface<I: ?Sized + 'static>() -> Self {
        Self {
            kind: TypeKind::Interface,
            ..Self::of::<I>()
        }
    }

    /// Override the inferred kind (e.g. mark an enum or an abstract base).
    pub fn with_kind(mut self, kind: TypeKind) -> Self {
        self.kind = kind;
        self
    }

    /// An open generic type definition such as `Repository<_>`.
    pub fn generic_definition(path: &'static str, arity: usize) -> Self {
        Self {
            identity: TypeIdentity::Definition(path),
            name: path,
            kind: TypeKind::GenericDefinition,
            shape: GenericShape::Definition { arity },
        }
    }

    /// A generic parameter placeholder at `index`.
    pub fn generic_parameter(index: usize, name: &'static str) -> Self {
        Self {
            identity: TypeIdentity::Parameter(index),
            name,
            kind: TypeKind::GenericParameter,
            shape: GenericShape::None,
        }
    }

    /// Describe `T` as the closed form of `definition` with `arguments`.
    pub fn closed<T: ?Sized + 'static>(
        definition: &TypeDescriptor,
        arguments: impl Into<Arc<[TypeDescriptor]>>,
    ) -> Result<Self> {
        let arguments = arguments.into();
        match definition.shape {
            GenericShape::Definition { arity } if arity == arguments.len() => Ok(Self {
                identity: TypeIdentity::Type(TypeId::of::<T>()),
                name: std::any::type_name::<T>(),
                kind: classify::<T>(),
                shape: GenericShape::Closed(Arc::new(ClosedGeneric {
                    definition: definition.clone(),
                    arguments,
                    collector: None,
                })),
            }),
            GenericShape::Definition { arity } => Err(DiError::Argument(format!(
                "{} expects {} type arguments, got {}",
                definition.name,
                arity,
                arguments.len()
            ))),
            _ => Err(DiError::Argument(format!(
                "{} is not a generic type definition",
                definition.name
            ))),
        }
    }

    /// The built-in "collection of T" definition.
    pub fn collection_definition() -> Self {
        Self::generic_definition(COLLECTION_DEFINITION, 1)
    }

    /// `Vec<Arc<T>>` as a closed collection of `T`.
    pub fn collection<T: Send + Sync + 'static>() -> Self {
        Self::collection_with::<Vec<Arc<T>>>(Self::of::<T>(), collect_sized::<T>)
    }

    /// `Vec<Arc<I>>` as a closed collection of the trait object `I`.
    pub fn collection_of_dyn<I: ?Sized + Send + Sync + 'static>() -> Self {
        Self::collection_with::<Vec<Arc<I>>>(Self::interface::<I>(), collect_dyn::<I>)
    }

    fn collection_with<C: 'static>(item: TypeDescriptor, collector: Collector) -> Self {
        Self {
            identity: TypeIdentity::Type(TypeId::of::<C>()),
            name: std::any::type_name::<C>(),
            kind: TypeKind::Concrete,
            shape: GenericShape::Closed(Arc::new(ClosedGeneric {
                definition: Self::collection_definition(),
                arguments: Arc::from(vec![item]),
                collector: Some(collector),
            })),
        }
    }

    #[inline]
    pub fn identity(&self) -> TypeIdentity {
        self.identity
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// True if this descriptor identifies `T`.
    #[inline]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.identity == TypeIdentity::Type(TypeId::of::<T>())
    }

    /// Arity of an open definition, `None` for anything else.
    pub fn arity(&self) -> Option<usize> {
        match self.shape {
            GenericShape::Definition { arity } => Some(arity),
            _ => None,
        }
    }

    /// The open definition this closed type was built from.
    pub fn generic_definition_of(&self) -> Option<&TypeDescriptor> {
        match &self.shape {
            GenericShape::Closed(closed) => Some(&closed.definition),
            _ => None,
        }
    }

    /// Type arguments of a closed generic (empty otherwise).
    pub fn generic_arguments(&self) -> &[TypeDescriptor] {
        match &self.shape {
            GenericShape::Closed(closed) => &closed.arguments,
            _ => &[],
        }
    }

    /// Item type when this is a closed collection.
    pub fn collection_item(&self) -> Option<&TypeDescriptor> {
        match &self.shape {
            GenericShape::Closed(closed) if closed.collector.is_some() => closed.arguments.first(),
            _ => None,
        }
    }

    pub(crate) fn collector(&self) -> Option<Collector> {
        match &self.shape {
            GenericShape::Closed(closed) => closed.collector,
            _ => None,
        }
    }

    /// True for definitions, parameters and closed types that still
    /// contain a parameter somewhere in their arguments.
    pub fn is_open(&self) -> bool {
        match &self.shape {
            GenericShape::Definition { .. } => true,
            GenericShape::Closed(closed) => closed.arguments.iter().any(TypeDescriptor::is_open),
            GenericShape::None => self.kind == TypeKind::GenericParameter,
        }
    }
}

impl PartialEq for TypeDescriptor {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Registry key: a type plus an optional registration name.
///
/// The hash is precomputed. With no name it is derived from the type
/// identity alone, so default-named lookups hash exactly like plain type
/// lookups.
///
/// # Examples
///
/// ```rust
/// use scoped_injector::TypeKey;
///
/// struct Engine;
///
/// assert_eq!(TypeKey::of::<Engine>(), TypeKey::named::<Engine>(""));
/// assert_ne!(TypeKey::of::<Engine>(), TypeKey::named::<Engine>("v8"));
/// ```
#[derive(Clone)]
pub struct TypeKey {
    ty: TypeDescriptor,
    name: Option<Arc<str>>,
    hash: u64,
}

impl TypeKey {
    /// Key for a descriptor with the default (empty) name.
    pub fn new(ty: TypeDescriptor) -> Self {
        let hash = KEY_HASHER.hash_one(ty.identity);
        Self {
            ty,
            name: None,
            hash,
        }
    }

    /// Key for a descriptor and registration name. An empty name is the default name.
    pub fn with_name(ty: TypeDescriptor, name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if name.is_empty() {
            return Self::new(ty);
        }
        let type_hash = KEY_HASHER.hash_one(ty.identity);
        let hash = KEY_HASHER.hash_one((type_hash, name));
        Self {
            ty,
            name: Some(Arc::from(name)),
            hash,
        }
    }

    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(TypeDescriptor::of::<T>())
    }

    #[inline]
    pub fn named<T: ?Sized + 'static>(name: impl AsRef<str>) -> Self {
        Self::with_name(TypeDescriptor::of::<T>(), name)
    }

    #[inline]
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.ty
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.ty.name()
    }

    /// Registration name, `""` for the default name.
    #[inline]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    #[inline]
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    #[inline]
    pub fn hash_code(&self) -> u64 {
        self.hash
    }

    /// Same type, default name.
    pub fn unnamed(&self) -> TypeKey {
        if self.name.is_none() {
            return self.clone();
        }
        Self::new(self.ty.clone())
    }

    /// Same name, different type.
    pub fn rekey(&self, ty: TypeDescriptor) -> TypeKey {
        match &self.name {
            Some(name) => Self::with_name(ty, name),
            None => Self::new(ty),
        }
    }
}

impl PartialEq for TypeKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.ty == other.ty && self.name == other.name
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeKey")
            .field("type", &self.ty.name())
            .field("name", &self.name())
            .finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}[{}]", self.ty.name(), name),
            None => f.write_str(self.ty.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    struct Engine;
    struct Wheel;
    trait Drive: Send + Sync {}

    fn std_hash<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_equal_keys_hash_identically() {
        let a = TypeKey::named::<Engine>("v8");
        let b = TypeKey::named::<Engine>(String::from("v8"));
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
        assert_eq!(std_hash(&a), std_hash(&b));

        let plain = TypeKey::of::<Engine>();
        let empty = TypeKey::named::<Engine>("");
        assert_eq!(plain, empty);
        assert_eq!(plain.hash_code(), empty.hash_code());
        assert!(!empty.has_name());
    }

    #[test]
    fn test_differing_fields_are_unequal() {
        assert_ne!(TypeKey::of::<Engine>(), TypeKey::of::<Wheel>());
        assert_ne!(TypeKey::named::<Engine>("a"), TypeKey::named::<Engine>("b"));
        assert_ne!(TypeKey::of::<Engine>(), TypeKey::named::<Engine>("a"));
    }

    #[test]
    fn test_unnamed_hash_comes_from_type_only() {
        let named = TypeKey::named::<Engine>("v8");
        let unnamed = named.unnamed();
        assert_eq!(unnamed, TypeKey::of::<Engine>());
        assert_eq!(unnamed.hash_code(), KEY_HASHER.hash_one(unnamed.descriptor().identity()));
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(TypeDescriptor::of::<u32>().kind(), TypeKind::Primitive);
        assert_eq!(TypeDescriptor::of::<String>().kind(), TypeKind::Primitive);
        assert_eq!(TypeDescriptor::of::<dyn Drive>().kind(), TypeKind::Interface);
        assert_eq!(TypeDescriptor::of::<fn(u32) -> u32>().kind(), TypeKind::Delegate);
        assert_eq!(TypeDescriptor::of::<Engine>().kind(), TypeKind::Concrete);
        assert!(TypeDescriptor::of::<Engine>().kind().is_constructible());
    }

    #[test]
    fn test_closed_generic_shape() {
        struct Repo<T>(std::marker::PhantomData<T>);

        let def = TypeDescriptor::generic_definition("tests::Repo", 1);
        let closed =
            TypeDescriptor::closed::<Repo<Engine>>(&def, vec![TypeDescriptor::of::<Engine>()])
                .unwrap();
        assert_eq!(closed.generic_definition_of(), Some(&def));
        assert_eq!(closed.generic_arguments().len(), 1);
        assert!(!closed.is_open());
        assert!(def.is_open());

        let half_open = TypeDescriptor::closed::<Repo<Wheel>>(
            &def,
            vec![TypeDescriptor::generic_parameter(0, "T")],
        )
        .unwrap();
        assert!(half_open.is_open());

        let wrong_arity = TypeDescriptor::closed::<Repo<Engine>>(&def, Vec::new());
        assert!(matches!(wrong_arity, Err(DiError::Argument(_))));
    }

    #[test]
    fn test_collection_descriptor() {
        let coll = TypeDescriptor::collection::<Engine>();
        assert!(coll.is::<Vec<Arc<Engine>>>());
        assert_eq!(coll.collection_item(), Some(&TypeDescriptor::of::<Engine>()));
        assert_eq!(
            coll.generic_definition_of(),
            Some(&TypeDescriptor::collection_definition())
        );

        let assembled = (coll.collector().unwrap())(vec![
            Arc::new(Engine) as AnyArc,
            Arc::new(Engine) as AnyArc,
        ])
        .unwrap();
        let items = assembled.downcast::<Vec<Arc<Engine>>>().unwrap();
        assert_eq!(items.len(), 2);
    }
}
