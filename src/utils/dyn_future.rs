use std::future::Future;
use std::pin::Pin;

/// Boxed future as returned by the bridge client and bus procedures
pub type DynFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Future that doesn't borrow its creator. Several of these can be pending at
/// once on the same client.
pub type DynFutureStatic<T> = DynFuture<'static, T>;

/// Box a procedure that borrows the client for its whole run
pub fn boxed<'a, F, T>(f: F) -> DynFuture<'a, T>
where
    F: Future<Output = T> + Send + 'a,
{
    Box::pin(f)
}
