//! Shared shape for remote API gateways.

use std::future::Future;
use std::pin::Pin;

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;
