use async_trait::async_trait;

use super::error::StrategyError;
use super::reference::VideoReference;
use super::{MediaLocation, ResolveContext, ResolutionStrategy, ResolvedMedia, StrategyOutcome};

/// Treats references outside the known platforms as directly fetchable media.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectUrlStrategy;

impl DirectUrlStrategy {
    pub const NAME: &'static str = "direct";
}

#[async_trait]
impl ResolutionStrategy for DirectUrlStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn resolve(
        &self,
        reference: &VideoReference,
        _context: &ResolveContext,
    ) -> Result<StrategyOutcome, StrategyError> {
        if reference.platform().is_known() {
            return Ok(StrategyOutcome::NotApplicable);
        }
        Ok(StrategyOutcome::Resolved(ResolvedMedia {
            location: MediaLocation::Remote(reference.url().clone()),
            strategy: Self::NAME,
            referer: None,
        }))
    }
}
