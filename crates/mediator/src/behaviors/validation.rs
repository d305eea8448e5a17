//! Request validation.
//!
//! Validators are registered per request type in a [`ValidatorSet`]. Every validator for the
//! request's type runs; if any of them reports a violation the request is rejected with
//! `ValidationFailed` carrying the merged list, and the handler is never invoked.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use dbets_core::Violations;

use crate::context::RequestContext;
use crate::envelope::RequestEnvelope;
use crate::error::MediatorError;
use crate::pipeline::{DispatchResult, Next, PipelineBehavior};
use crate::request::Request;

/// Field-level rules for one request type.
///
/// Any `Fn(&R) -> Violations` closure is a validator.
pub trait Validator<R: Request>: Send + Sync + 'static {
    fn validate(&self, request: &R) -> Violations;
}

impl<R, F> Validator<R> for F
where
    R: Request,
    F: Fn(&R) -> Violations + Send + Sync + 'static,
{
    fn validate(&self, request: &R) -> Violations {
        self(request)
    }
}

trait ErasedValidator: Send + Sync {
    fn validate(&self, request: &(dyn Any + Send + Sync)) -> Violations;
}

struct ValidatorAdapter<R, V> {
    validator: V,
    _request: PhantomData<fn(R)>,
}

impl<R, V> ErasedValidator for ValidatorAdapter<R, V>
where
    R: Request,
    V: Validator<R>,
{
    fn validate(&self, request: &(dyn Any + Send + Sync)) -> Violations {
        request
            .downcast_ref::<R>()
            .map(|r| self.validator.validate(r))
            .unwrap_or_default()
    }
}

/// Validators keyed by request type.
#[derive(Clone, Default)]
pub struct ValidatorSet {
    validators: HashMap<TypeId, Vec<Arc<dyn ErasedValidator>>>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R, V>(mut self, validator: V) -> Self
    where
        R: Request,
        V: Validator<R>,
    {
        self.validators
            .entry(TypeId::of::<R>())
            .or_default()
            .push(Arc::new(ValidatorAdapter {
                validator,
                _request: PhantomData::<fn(R)>,
            }));
        self
    }

    pub fn count_for<R: Request>(&self) -> usize {
        self.validators
            .get(&TypeId::of::<R>())
            .map_or(0, Vec::len)
    }

    /// Run every validator registered for the envelope's request type.
    pub fn validate(&self, envelope: &RequestEnvelope) -> Violations {
        let mut violations = Violations::new();
        let Some(validators) = self.validators.get(&envelope.type_id()) else {
            return violations;
        };
        let request = envelope.as_any();
        for validator in validators {
            violations.extend(validator.validate(request));
        }
        violations
    }
}

impl core::fmt::Debug for ValidatorSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValidatorSet")
            .field("request_types", &self.validators.len())
            .finish()
    }
}

/// Rejects requests that fail their validators.
#[derive(Debug, Default, Clone)]
pub struct ValidationBehavior {
    validators: ValidatorSet,
}

impl ValidationBehavior {
    pub fn new(validators: ValidatorSet) -> Self {
        Self { validators }
    }
}

#[async_trait]
impl PipelineBehavior for ValidationBehavior {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn handle(
        &self,
        envelope: RequestEnvelope,
        _ctx: &RequestContext,
        next: Next<'_>,
    ) -> DispatchResult {
        let violations = self.validators.validate(&envelope);
        if !violations.is_empty() {
            tracing::debug!(
                request_type = envelope.short_type(),
                fields = ?violations.fields(),
                "request failed validation"
            );
            return Err(MediatorError::ValidationFailed(violations));
        }
        next.run(envelope).await
    }
}
