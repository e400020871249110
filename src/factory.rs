//! Object factories: create, validate and clean up pooled resources

use crate::errors::BoxError;
use std::marker::PhantomData;
use std::sync::Arc;

/// The factory's verdict on a resource that is being returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validation {
    /// Resource re-enters the available set.
    Valid,
    /// Resource is cleaned up and discarded.
    Invalid,
    /// The whole pool is stopped.
    ClosePool,
}

/// Creates, validates and cleans up pooled resources
///
/// # Examples
///
/// ```
/// use resilient_pool::{BoxError, ObjectFactory, Validation};
///
/// struct Buffers;
///
/// impl ObjectFactory<Vec<u8>> for Buffers {
///     fn create(&self) -> Result<Vec<u8>, BoxError> {
///         Ok(Vec::with_capacity(1024))
///     }
///
///     fn validate(&self, buf: &Vec<u8>, error: Option<&BoxError>) -> Validation {
///         if error.is_some() || buf.capacity() < 1024 {
///             Validation::Invalid
///         } else {
///             Validation::Valid
///         }
///     }
/// }
///
/// assert_eq!(Buffers.validate(&Vec::new(), None), Validation::Invalid);
/// ```
pub trait ObjectFactory<T>: Send + Sync {
    fn create(&self) -> Result<T, BoxError>;

    /// Judge a returned resource, given the error seen while it was on loan.
    fn validate(&self, _object: &T, _error: Option<&BoxError>) -> Validation {
        Validation::Valid
    }

    fn cleanup(&self, object: T) {
        drop(object);
    }
}

impl<T, F: ObjectFactory<T> + ?Sized> ObjectFactory<T> for Arc<F> {
    fn create(&self) -> Result<T, BoxError> {
        (**self).create()
    }

    fn validate(&self, object: &T, error: Option<&BoxError>) -> Validation {
        (**self).validate(object, error)
    }

    fn cleanup(&self, object: T) {
        (**self).cleanup(object)
    }
}

/// Factory variant that only answers "keep it or not" on return.
pub trait SimpleObjectFactory<T>: Send + Sync {
    fn create(&self) -> Result<T, BoxError>;

    fn should_add_to_pool(&self, object: &T) -> bool;

    fn cleanup(&self, object: T) {
        drop(object);
    }
}

/// Adapts a [`SimpleObjectFactory`] to [`ObjectFactory`]; `true` maps to
/// [`Validation::Valid`] and `false` to [`Validation::Invalid`].
pub struct Simple<S>(pub S);

impl<T, S: SimpleObjectFactory<T>> ObjectFactory<T> for Simple<S> {
    fn create(&self) -> Result<T, BoxError> {
        self.0.create()
    }

    fn validate(&self, object: &T, _error: Option<&BoxError>) -> Validation {
        if self.0.should_add_to_pool(object) {
            Validation::Valid
        } else {
            Validation::Invalid
        }
    }

    fn cleanup(&self, object: T) {
        self.0.cleanup(object)
    }
}

type CreateFn<T> = dyn Fn() -> Result<T, BoxError> + Send + Sync;
type ValidateFn<T> = dyn Fn(&T, Option<&BoxError>) -> Validation + Send + Sync;
type CleanupFn<T> = dyn Fn(T) + Send + Sync;

/// Closure-backed factory
///
/// # Examples
///
/// ```
/// use resilient_pool::{FnFactory, ObjectFactory, Validation};
///
/// let factory = FnFactory::new(|| Ok(String::from("conn")))
///     .with_validation(|_, error| match error {
///         Some(_) => Validation::Invalid,
///         None => Validation::Valid,
///     });
///
/// let conn = factory.create().unwrap();
/// assert_eq!(factory.validate(&conn, None), Validation::Valid);
/// ```
pub struct FnFactory<T> {
    create: Arc<CreateFn<T>>,
    validate: Option<Arc<ValidateFn<T>>>,
    cleanup: Option<Arc<CleanupFn<T>>>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> FnFactory<T> {
    pub fn new<F>(create: F) -> Self
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
            validate: None,
            cleanup: None,
            _phantom: PhantomData,
        }
    }

    pub fn with_validation<V>(mut self, validate: V) -> Self
    where
        V: Fn(&T, Option<&BoxError>) -> Validation + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// Simple-variant validation: keep the resource when `predicate` holds.
    pub fn with_should_add_to_pool<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.with_validation(move |object, _| {
            if predicate(object) {
                Validation::Valid
            } else {
                Validation::Invalid
            }
        })
    }

    pub fn with_cleanup<C>(mut self, cleanup: C) -> Self
    where
        C: Fn(T) + Send + Sync + 'static,
    {
        self.cleanup = Some(Arc::new(cleanup));
        self
    }
}

impl<T> Clone for FnFactory<T> {
    fn clone(&self) -> Self {
        Self {
            create: Arc::clone(&self.create),
            validate: self.validate.clone(),
            cleanup: self.cleanup.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> ObjectFactory<T> for FnFactory<T> {
    fn create(&self) -> Result<T, BoxError> {
        (self.create)()
    }

    fn validate(&self, object: &T, error: Option<&BoxError>) -> Validation {
        match &self.validate {
            Some(validate) => validate(object, error),
            None => Validation::Valid,
        }
    }

    fn cleanup(&self, object: T) {
        if let Some(cleanup) = &self.cleanup {
            cleanup(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EvenOnly;

    impl SimpleObjectFactory<u32> for EvenOnly {
        fn create(&self) -> Result<u32, BoxError> {
            Ok(2)
        }

        fn should_add_to_pool(&self, object: &u32) -> bool {
            object % 2 == 0
        }
    }

    #[test]
    fn test_simple_adapter() {
        let factory = Simple(EvenOnly);
        assert_eq!(factory.create().unwrap(), 2);
        assert_eq!(factory.validate(&4, None), Validation::Valid);
        assert_eq!(factory.validate(&3, None), Validation::Invalid);
    }

    #[test]
    fn test_fn_factory_cleanup() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleaned);
        let factory = FnFactory::new(|| Ok(7u8))
            .with_should_add_to_pool(|v| *v > 5)
            .with_cleanup(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert_eq!(factory.validate(&6, None), Validation::Valid);
        assert_eq!(factory.validate(&1, None), Validation::Invalid);
        factory.cleanup(7);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_validation_is_valid() {
        let factory = FnFactory::new(|| Ok(()));
        let error: BoxError = "boom".into();
        assert_eq!(factory.validate(&(), Some(&error)), Validation::Valid);
    }
}
