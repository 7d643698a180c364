//! Typed construction
//!
//! Types that declare their dependencies at compile time implement
//! [`Constructible`]. The container turns that declaration into an ordinary
//! positional [`TypeConstructionInfo`], so typed and hand-built recipes go
//! through the same resolve path.
//!
//! # Example
//!
//! ```rust
//! use scoped_injector::{Constructible, Container};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! impl Constructible for Database {
//!     type Dependencies = ();
//!
//!     fn construct(_: ()) -> Self {
//!         Database { url: "postgres://localhost".into() }
//!     }
//! }
//!
//! struct UserRepository {
//!     db: Arc<Database>,
//! }
//!
//! impl Constructible for UserRepository {
//!     type Dependencies = Arc<Database>;
//!
//!     fn construct(db: Arc<Database>) -> Self {
//!         UserRepository { db }
//!     }
//! }
//!
//! let container = Container::new();
//! container.singleton::<Database>().unwrap();
//! container.transient::<UserRepository>().unwrap();
//!
//! let repo = container.get::<UserRepository>().unwrap();
//! assert_eq!(repo.db.url, "postgres://localhost");
//! ```

use crate::error::{BoxError, DiError, Result};
use crate::factory::{Dependency, InstantiationRecipe, PositionalRecipe, TypeConstructionInfo};
use crate::key::TypeDescriptor;
use crate::provider::{AnyArc, DisposeProbe, erase_dyn, unerase_dyn};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

// =============================================================================
// Dyn - interface handles
// =============================================================================

/// Handle to an instance registered under a trait-object type.
///
/// Use `Dyn<dyn Trait>` as a dependency to receive whatever implementation
/// is mapped to `dyn Trait`.
pub struct Dyn<I: ?Sized>(pub Arc<I>);

impl<I: ?Sized> Dyn<I> {
    #[inline]
    pub fn into_inner(self) -> Arc<I> {
        self.0
    }
}

impl<I: ?Sized> Deref for Dyn<I> {
    type Target = I;

    #[inline]
    fn deref(&self) -> &I {
        &self.0
    }
}

impl<I: ?Sized> Clone for Dyn<I> {
    fn clone(&self) -> Self {
        Dyn(Arc::clone(&self.0))
    }
}

impl<I: ?Sized> fmt::Debug for Dyn<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dyn").field(&std::any::type_name::<I>()).finish()
    }
}

// =============================================================================
// Parameter - one dependency slot
// =============================================================================

/// A single dependency slot: how it is described and how its resolved
/// argument becomes a typed value.
///
/// Implemented for:
/// - `Arc<T>` - required dependency
/// - `Option<Arc<T>>` - optional dependency
/// - `Vec<Arc<T>>` - every registration of `T`
/// - `Dyn<I>`, `Option<Dyn<I>>`, `Vec<Dyn<I>>` - the same for trait objects
pub trait Parameter: Sized + 'static {
    fn dependency(name: &'static str) -> Dependency;

    fn from_argument(argument: Option<AnyArc>) -> Result<Self>;
}

fn required<T: ?Sized + 'static>(argument: Option<AnyArc>) -> Result<AnyArc> {
    argument.ok_or_else(|| {
        DiError::resolve(
            std::any::type_name::<T>(),
            "received null for a required dependency",
        )
    })
}

fn mismatch<T: ?Sized + 'static>() -> DiError {
    DiError::resolve(
        std::any::type_name::<T>(),
        "resolved instance has an unexpected runtime type",
    )
}

fn downcast<T: Send + Sync + 'static>(value: AnyArc) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| mismatch::<T>())
}

impl<T: Send + Sync + 'static> Parameter for Arc<T> {
    fn dependency(name: &'static str) -> Dependency {
        Dependency::of::<T>(name)
    }

    fn from_argument(argument: Option<AnyArc>) -> Result<Self> {
        downcast::<T>(required::<T>(argument)?)
    }
}

impl<T: Send + Sync + 'static> Parameter for Option<Arc<T>> {
    fn dependency(name: &'static str) -> Dependency {
        Dependency::of::<T>(name).optional()
    }

    fn from_argument(argument: Option<AnyArc>) -> Result<Self> {
        argument.map(downcast::<T>).transpose()
    }
}

impl<T: Send + Sync + 'static> Parameter for Vec<Arc<T>> {
    fn dependency(name: &'static str) -> Dependency {
        Dependency::collection::<T>(name)
    }

    fn from_argument(argument: Option<AnyArc>) -> Result<Self> {
        let items = downcast::<Vec<Arc<T>>>(required::<Vec<Arc<T>>>(argument)?)?;
        Ok(Arc::unwrap_or_clone(items))
    }
}

impl<I: ?Sized + Send + Sync + 'static> Parameter for Dyn<I> {
    fn dependency(name: &'static str) -> Dependency {
        Dependency::interface::<I>(name)
    }

    fn from_argument(argument: Option<AnyArc>) -> Result<Self> {
        unerase_dyn::<I>(required::<I>(argument)?)
            .map(Dyn)
            .ok_or_else(mismatch::<I>)
    }
}

impl<I: ?Sized + Send + Sync + 'static> Parameter for Option<Dyn<I>> {
    fn dependency(name: &'static str) -> Dependency {
        Dependency::interface::<I>(name).optional()
    }

    fn from_argument(argument: Option<AnyArc>) -> Result<Self> {
        match argument {
            Some(value) => unerase_dyn::<I>(value)
                .map(|handle| Some(Dyn(handle)))
                .ok_or_else(mismatch::<I>),
            None => Ok(None),
        }
    }
}

impl<I: ?Sized + Send + Sync + 'static> Parameter for Vec<Dyn<I>> {
    fn dependency(name: &'static str) -> Dependency {
        Dependency::new(name, TypeDescriptor::collection_of_dyn::<I>())
    }

    fn from_argument(argument: Option<AnyArc>) -> Result<Self> {
        let items = downcast::<Vec<Arc<I>>>(required::<Vec<Arc<I>>>(argument)?)?;
        Ok(items.iter().map(|handle| Dyn(Arc::clone(handle))).collect())
    }
}

// =============================================================================
// Parameters - the full argument list
// =============================================================================

/// Ordered dependency list of a typed recipe.
///
/// Implemented for `()`, every [`Parameter`] type on its own, and tuples
/// of up to eight parameters.
pub trait Parameters: Sized + 'static {
    /// Describe each slot; `names[i]` names slot `i` when present.
    fn dependencies(names: &[&'static str]) -> Vec<Dependency>;

    /// Convert positional arguments back into typed values.
    fn from_arguments(arguments: Vec<Option<AnyArc>>) -> Result<Self>;
}

static DEFAULT_NAMES: [&str; 8] = ["arg0", "arg1", "arg2", "arg3", "arg4", "arg5", "arg6", "arg7"];

#[inline]
fn name_at(names: &[&'static str], index: usize) -> &'static str {
    names
        .get(index)
        .or_else(|| DEFAULT_NAMES.get(index))
        .copied()
        .unwrap_or("arg")
}

impl Parameters for () {
    #[inline]
    fn dependencies(_names: &[&'static str]) -> Vec<Dependency> {
        Vec::new()
    }

    #[inline]
    fn from_arguments(_arguments: Vec<Option<AnyArc>>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_single_parameters {
    ($([$($generics:tt)*] $ty:ty),+ $(,)?) => {
        $(
            impl<$($generics)*> Parameters for $ty {
                fn dependencies(names: &[&'static str]) -> Vec<Dependency> {
                    vec![<$ty as Parameter>::dependency(name_at(names, 0))]
                }

                fn from_arguments(arguments: Vec<Option<AnyArc>>) -> Result<Self> {
                    <$ty as Parameter>::from_argument(arguments.into_iter().next().flatten())
                }
            }
        )+
    };
}

impl_single_parameters!(
    [T: Send + Sync + 'static] Arc<T>,
    [T: Send + Sync + 'static] Option<Arc<T>>,
    [T: Send + Sync + 'static] Vec<Arc<T>>,
    [I: ?Sized + Send + Sync + 'static] Dyn<I>,
    [I: ?Sized + Send + Sync + 'static] Option<Dyn<I>>,
    [I: ?Sized + Send + Sync + 'static] Vec<Dyn<I>>,
);

macro_rules! impl_parameters_tuple {
    ($($P:ident => $index:tt),+) => {
        impl<$($P: Parameter),+> Parameters for ($($P,)+) {
            fn dependencies(names: &[&'static str]) -> Vec<Dependency> {
                vec![$($P::dependency(name_at(names, $index))),+]
            }

            fn from_arguments(arguments: Vec<Option<AnyArc>>) -> Result<Self> {
                let mut arguments = arguments.into_iter();
                Ok(($($P::from_argument(arguments.next().flatten())?,)+))
            }
        }
    };
}

impl_parameters_tuple!(A => 0);
impl_parameters_tuple!(A => 0, B => 1);
impl_parameters_tuple!(A => 0, B => 1, C => 2);
impl_parameters_tuple!(A => 0, B => 1, C => 2, D => 3);
impl_parameters_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_parameters_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_parameters_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_parameters_tuple!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);

// =============================================================================
// Constructible
// =============================================================================

/// A type the container can build from declared dependencies.
///
/// `Dependencies` is `()`, a single [`Parameter`], or a tuple of them.
/// The container resolves each slot and passes the result to
/// [`construct`](Self::construct).
///
/// Use `#[derive(Constructible)]` (feature `derive`) to generate this from
/// struct fields.
pub trait Constructible: Send + Sync + Sized + 'static {
    type Dependencies: Parameters;

    /// Parameter names, used by overrides and diagnostics.
    fn parameter_names() -> &'static [&'static str] {
        &[]
    }

    /// Registration name each parameter resolves against (`None` = default).
    fn parameter_targets() -> &'static [Option<&'static str>] {
        &[]
    }

    /// Disposal probe for instances of this type, if it supports disposal.
    fn dispose_probe() -> Option<DisposeProbe> {
        None
    }

    fn construct(dependencies: Self::Dependencies) -> Self;
}

fn parameters_of<D: Parameters>(
    names: &[&'static str],
    targets: &[Option<&'static str>],
) -> Vec<Dependency> {
    D::dependencies(names)
        .into_iter()
        .enumerate()
        .map(|(i, dep)| match targets.get(i).copied().flatten() {
            Some(target) => dep.with_target_name(target),
            None => dep,
        })
        .collect()
}

/// Positional constructor recipe for `T`.
pub fn constructor_recipe<T: Constructible>() -> PositionalRecipe {
    PositionalRecipe::new(
        std::any::type_name::<T>(),
        parameters_of::<T::Dependencies>(T::parameter_names(), T::parameter_targets()),
        |arguments| {
            let dependencies = T::Dependencies::from_arguments(arguments)?;
            Ok(Arc::new(T::construct(dependencies)) as AnyArc)
        },
    )
}

/// Construction plan that builds `T` through its constructor.
#[inline]
pub fn constructor_info<T: Constructible>() -> TypeConstructionInfo {
    TypeConstructionInfo::new(InstantiationRecipe::ByConstructor(constructor_recipe::<T>()))
}

/// Construction plan that builds `T` with a factory function taking `D`.
pub fn factory_info<T, D, F>(factory: F) -> TypeConstructionInfo
where
    T: Send + Sync + 'static,
    D: Parameters,
    F: Fn(D) -> T + Send + Sync + 'static,
{
    TypeConstructionInfo::factory(
        std::any::type_name::<F>(),
        D::dependencies(&[]),
        move |arguments| Ok(Arc::new(factory(D::from_arguments(arguments)?)) as AnyArc),
    )
}

/// Like [`factory_info`], for factories that can fail.
///
/// A factory error surfaces as [`DiError::CreationFailed`] naming `T`.
pub fn fallible_factory_info<T, D, F>(factory: F) -> TypeConstructionInfo
where
    T: Send + Sync + 'static,
    D: Parameters,
    F: Fn(D) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
{
    TypeConstructionInfo::factory(
        std::any::type_name::<F>(),
        D::dependencies(&[]),
        move |arguments| {
            let value = factory(D::from_arguments(arguments)?)
                .map_err(|e| DiError::creation_failed_for::<T>(e.to_string()))?;
            Ok(Arc::new(value) as AnyArc)
        },
    )
}

/// Construction plan that builds `T` and stores it under the interface `I`.
///
/// `cast` performs the unsizing coercion, usually `|t| t as Arc<dyn Trait>`.
pub fn interface_info<I, T>(cast: fn(Arc<T>) -> Arc<I>) -> TypeConstructionInfo
where
    I: ?Sized + Send + Sync + 'static,
    T: Constructible,
{
    let concrete = constructor_recipe::<T>();
    let parameters = concrete.parameters().to_vec();
    TypeConstructionInfo::factory(std::any::type_name::<T>(), parameters, move |arguments| {
        let dependencies = T::Dependencies::from_arguments(arguments)?;
        Ok(erase_dyn::<I>(cast(Arc::new(T::construct(dependencies)))))
    })
}
