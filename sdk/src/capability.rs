//! Capability trait
//!
//! Every invocable action in the registry, built-in or generated, is backed
//! by a handler implementing [`Capability`]. Handlers receive already-bound
//! arguments (no placeholders) and return result text plus metadata.

use crate::types::{CapabilityError, CapabilityInput, CapabilityOutput};
use async_trait::async_trait;

/// Trait that all capability handlers must implement
#[async_trait]
pub trait Capability: Send + Sync {
    /// Handle a single invocation
    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError>;
}

/// Adapter turning a synchronous closure into a [`Capability`].
///
/// ```
/// use sdk::capability::{Capability, FnCapability};
/// use sdk::types::{CapabilityInput, CapabilityOutput};
///
/// let echo = FnCapability::new(|input: CapabilityInput| {
///     Ok(CapabilityOutput::text(input.arg("text")?.to_string()))
/// });
/// # let _ = echo;
/// ```
pub struct FnCapability<F> {
    handler: F,
}

impl<F> FnCapability<F>
where
    F: Fn(CapabilityInput) -> Result<CapabilityOutput, CapabilityError> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> Capability for FnCapability<F>
where
    F: Fn(CapabilityInput) -> Result<CapabilityOutput, CapabilityError> + Send + Sync,
{
    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        (self.handler)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_capability_invokes_closure() {
        let upper = FnCapability::new(|input: CapabilityInput| {
            Ok(CapabilityOutput::text(input.arg("text")?.to_uppercase()))
        });

        let output = upper
            .invoke(CapabilityInput::new("text:upper").with_arg("text", "abc"))
            .await
            .unwrap();
        assert_eq!(output.text, "ABC");

        let err = upper
            .invoke(CapabilityInput::new("text:upper"))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::MissingArgument(_)));
    }
}
