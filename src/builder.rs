use crate::config::{
    EngineConfig, Initialization, Normalization, NormalizationScope, ObjectiveKind,
    SamplingStrategy, Stretch,
};
use crate::device::ExecutionContext;
use crate::engine::RankEmbedding;
use crate::error::Result;

// Add logging
use log::{debug, info};

pub struct RankEmbeddingBuilder {
    config: EngineConfig,
    // None means the default parallel context, built lazily in `build`
    ctx: Option<ExecutionContext>,
}

impl Default for RankEmbeddingBuilder {
    fn default() -> Self {
        debug!("Creating RankEmbeddingBuilder with default parameters");
        Self {
            config: EngineConfig::default(),
            ctx: None,
        }
    }
}

impl RankEmbeddingBuilder {
    pub fn new() -> Self {
        info!("Initializing new RankEmbeddingBuilder");
        Self::default()
    }

    /// Replaces every parameter at once.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reference_count(mut self, count: usize) -> Self {
        self.config.reference_count = count;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingStrategy) -> Self {
        self.config.sampling = sampling;
        self
    }

    pub fn with_epoch_count(mut self, epochs: usize) -> Self {
        self.config.epoch_count = epochs;
        self
    }

    /// Soft-rank strength ε; larger values give smoother, flatter ranks.
    pub fn with_rank_regularization(mut self, strength: f64) -> Self {
        self.config.rank_regularization = strength;
        self
    }

    pub fn with_initialization(mut self, initialization: Initialization) -> Self {
        self.config.initialization = initialization;
        self
    }

    pub fn with_similarity_regularization(mut self, weight: f64) -> Self {
        self.config.similarity_regularization = weight;
        self
    }

    pub fn with_output_channels(mut self, channels: usize) -> Self {
        self.config.output_channels = channels;
        self
    }

    pub fn with_color_conversion(mut self, enabled: bool) -> Self {
        self.config.color_conversion = enabled;
        self
    }

    pub fn with_objective(mut self, objective: ObjectiveKind) -> Self {
        self.config.objective = objective;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.config.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn with_normalization(mut self, scope: NormalizationScope, stretch: Stretch) -> Self {
        self.config.normalization = Normalization { scope, stretch };
        self
    }

    pub fn with_context(mut self, ctx: ExecutionContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates the configuration and builds the engine.
    pub fn build(self) -> Result<RankEmbedding> {
        self.config.validate()?;
        info!(
            "Building RankEmbedding: M={}, epochs={}, ε={}, C={}",
            self.config.reference_count,
            self.config.epoch_count,
            self.config.rank_regularization,
            self.config.output_channels
        );
        let ctx = self.ctx.unwrap_or_default();
        RankEmbedding::new(self.config, ctx)
    }
}
