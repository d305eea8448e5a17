use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use crate::error::MediatorError;
use crate::request::{Request, RequestKind};

/// Type-erased response travelling back up the pipeline.
///
/// Shared (`Arc`) so the caching behavior can keep a copy without knowing the type.
pub type ErasedResponse = Arc<dyn Any + Send + Sync>;

/// Envelope for a request travelling through the pipeline.
///
/// Behaviors apply to **every** request type, so they see the request type-erased plus the
/// metadata they need to do their job without knowing the concrete type:
///
/// - `request_type`: stable name for logs and error reports
/// - `kind`: command or query (caching only applies to queries)
/// - `cache_key` / `cache_ttl`: computed once when the envelope is created; the key is
///   prefixed with the full request type name
///
/// A behavior that knows a concrete type can still inspect it via `downcast_ref()` or
/// rewrite it via `map()`.
pub struct RequestEnvelope {
    request: Box<dyn Any + Send + Sync>,
    type_id: TypeId,
    request_type: &'static str,
    kind: RequestKind,
    cache_key: Option<String>,
    cache_ttl: Option<Duration>,
}

impl RequestEnvelope {
    pub fn new<R: Request>(request: R) -> Self {
        let kind = request.kind();
        let request_type = core::any::type_name::<R>();
        let cache_key = match kind {
            RequestKind::Query => request
                .cache_key()
                .map(|key| format!("{request_type}:{key}")),
            RequestKind::Command => None,
        };
        let cache_ttl = request.cache_ttl();

        Self {
            request: Box::new(request),
            type_id: TypeId::of::<R>(),
            request_type,
            kind,
            cache_key,
            cache_ttl,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    /// Short type name (last path segment), for log fields.
    pub fn short_type(&self) -> &'static str {
        short_type_name(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn downcast_ref<R: Request>(&self) -> Option<&R> {
        self.request.downcast_ref::<R>()
    }

    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self.request.as_ref()
    }

    /// Unwrap the concrete request. Returns the envelope untouched on type mismatch.
    pub fn into_request<R: Request>(self) -> Result<R, Self> {
        if self.type_id != TypeId::of::<R>() {
            return Err(self);
        }
        let RequestEnvelope {
            request,
            type_id,
            request_type,
            kind,
            cache_key,
            cache_ttl,
        } = self;
        match request.downcast::<R>() {
            Ok(request) => Ok(*request),
            Err(request) => Err(RequestEnvelope {
                request,
                type_id,
                request_type,
                kind,
                cache_key,
                cache_ttl,
            }),
        }
    }

    /// Rewrite the request in place (metadata is recomputed from the new value).
    pub fn map<R: Request>(self, f: impl FnOnce(R) -> R) -> Result<Self, Self> {
        let request = self.into_request::<R>()?;
        Ok(RequestEnvelope::new(f(request)))
    }
}

impl core::fmt::Debug for RequestEnvelope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("request_type", &self.request_type)
            .field("kind", &self.kind)
            .field("cache_key", &self.cache_key)
            .finish_non_exhaustive()
    }
}

/// Recover the typed response at the end of the pipeline.
///
/// The response is unwrapped without copying unless a cache still holds it.
pub(crate) fn downcast_response<R: Request>(
    response: ErasedResponse,
) -> Result<R::Response, MediatorError> {
    let response = response.downcast::<R::Response>().map_err(|_| {
        MediatorError::unexpected(anyhow::anyhow!(
            "pipeline returned a response of the wrong type for `{}`",
            core::any::type_name::<R>()
        ))
    })?;
    Ok(Arc::try_unwrap(response).unwrap_or_else(|shared| (*shared).clone()))
}

pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct GetBalance {
        user: String,
    }

    impl Request for GetBalance {
        type Response = u64;

        fn kind(&self) -> RequestKind {
            RequestKind::Query
        }

        fn cache_ttl(&self) -> Option<Duration> {
            Some(Duration::from_secs(5))
        }
    }

    #[derive(Debug)]
    struct Deposit;

    impl Request for Deposit {
        type Response = ();
    }

    #[test]
    fn captures_metadata_once() {
        let env = RequestEnvelope::new(GetBalance {
            user: "alice".to_string(),
        });
        assert_eq!(env.kind(), RequestKind::Query);
        assert_eq!(env.short_type(), "GetBalance");
        assert_eq!(env.type_id(), TypeId::of::<GetBalance>());
        let key = env.cache_key().unwrap();
        assert!(key.starts_with(core::any::type_name::<GetBalance>()));
        assert!(key.contains("alice"));
        assert_eq!(env.cache_ttl(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn unwraps_only_the_matching_type() {
        let env = RequestEnvelope::new(GetBalance {
            user: "bob".to_string(),
        });
        let env = env.into_request::<Deposit>().unwrap_err();
        assert_eq!(
            env.into_request::<GetBalance>().unwrap(),
            GetBalance {
                user: "bob".to_string()
            }
        );
    }

    #[test]
    fn map_recomputes_cache_key() {
        let env = RequestEnvelope::new(GetBalance {
            user: "Carol".to_string(),
        });
        let env = env
            .map(|q: GetBalance| GetBalance {
                user: q.user.to_lowercase(),
            })
            .unwrap();
        assert!(env.cache_key().unwrap().contains("carol"));
        assert_eq!(env.downcast_ref::<GetBalance>().unwrap().user, "carol");
    }

    #[test]
    fn shared_responses_are_cloned() {
        let shared: ErasedResponse = Arc::new(42u64);
        let kept = shared.clone();
        assert_eq!(downcast_response::<GetBalance>(shared).unwrap(), 42);
        assert_eq!(kept.downcast_ref::<u64>(), Some(&42));
    }

    #[test]
    fn wrong_response_type_is_unexpected() {
        let wrong: ErasedResponse = Arc::new("nope");
        assert!(matches!(
            downcast_response::<GetBalance>(wrong),
            Err(MediatorError::Unexpected(_))
        ));
    }

    #[test]
    fn short_names_strip_paths_and_generics() {
        assert_eq!(short_type_name("a::b::CreateUser"), "CreateUser");
        assert_eq!(short_type_name("a::Wrapper<a::b::Inner>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
