use crate::{
    error::{GenError, Result},
    models::{Candidate, CandidateRole, QualityTier},
    retry::RetryPolicy,
    waterfall::CandidateOrder,
};
use std::env;
use std::time::Duration;

pub const DEFAULT_THINKING_BUDGET: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct BedrockConfig {
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        BedrockConfig {
            region: None,
            access_key: None,
            secret_key: None,
        }
    }
}

impl BedrockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let region = env::var("AWS_REGION")
            .or_else(|_| env::var("AWS_DEFAULT_REGION"))
            .ok();
        let access_key = env::var("AWS_ACCESS_KEY_ID").ok();
        let secret_key = env::var("AWS_SECRET_ACCESS_KEY").ok();

        BedrockConfig {
            region,
            access_key,
            secret_key,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }
}

/// Every ordered candidate list the orchestrator walks.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    pub standard_image: Candidate,
    pub pro_image: Candidate,
    /// Rungs after the tier primaries: synthesis, two experimental, one legacy.
    pub image_fallbacks: CandidateOrder,
    pub edit: CandidateOrder,
    pub describe: CandidateOrder,
    pub synthesize: CandidateOrder,
    pub chat_thinking: Candidate,
    pub chat_fast: CandidateOrder,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        let image = RetryPolicy::default();
        let describe = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(2000))
            .with_multiplier(2.0);

        let nova_canvas = Candidate::new("amazon.nova-canvas-v1:0", "nova-canvas")
            .with_resolution_control()
            .with_image_input()
            .with_retry(image);
        let titan_v2 = Candidate::new("amazon.titan-image-generator-v2:0", "titan-image-v2")
            .with_image_input()
            .with_retry(image);
        let titan_v1 = Candidate::new("amazon.titan-image-generator-v1", "titan-image-v1")
            .with_image_input()
            .with_retry(image);
        let sd35 = Candidate::new("stability.sd3-5-large-v1:0", "stability-sd3").with_retry(image);

        Self {
            standard_image: titan_v2.clone(),
            pro_image: nova_canvas.clone(),
            image_fallbacks: CandidateOrder::new(vec![
                sd35.clone(),
                Candidate::new("stability.stable-image-core-v1:1", "stability-core")
                    .with_retry(image),
                Candidate::new("stability.stable-image-ultra-v1:1", "stability-ultra")
                    .with_retry(image),
                titan_v1.clone(),
            ]),
            edit: CandidateOrder::new(vec![nova_canvas, titan_v2.clone(), titan_v1.clone()]),
            describe: CandidateOrder::new(vec![
                Candidate::new("anthropic.claude-3-5-sonnet-20240620-v1:0", "claude-sonnet")
                    .with_image_input()
                    .with_retry(describe),
                Candidate::new("anthropic.claude-3-haiku-20240307-v1:0", "claude-haiku")
                    .with_image_input()
                    .with_retry(describe),
            ]),
            synthesize: CandidateOrder::new(vec![titan_v2, sd35, titan_v1]),
            chat_thinking: Candidate::new(
                "us.anthropic.claude-3-7-sonnet-20250219-v1:0",
                "claude-sonnet-thinking",
            )
            .with_thinking_budget(DEFAULT_THINKING_BUDGET),
            chat_fast: CandidateOrder::new(vec![
                Candidate::new("anthropic.claude-3-5-haiku-20241022-v1:0", "claude-haiku-3-5"),
                Candidate::new("anthropic.claude-3-haiku-20240307-v1:0", "claude-haiku"),
                Candidate::new("amazon.titan-text-express-v1", "titan-text"),
            ]),
        }
    }
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full generate waterfall for `tier`: the tier primary, the standard
    /// model when the tier is pro, then the shared fallbacks.
    pub fn generate_order(&self, tier: QualityTier) -> CandidateOrder {
        let mut order = self.image_fallbacks.clone();
        if tier == QualityTier::Pro {
            order = order.prepended(self.standard_image.clone());
            order = order.prepended(self.pro_image.clone());
        } else {
            order = order.prepended(self.standard_image.clone());
        }
        order
    }

    pub fn chat_order(&self, thinking: bool) -> CandidateOrder {
        if thinking {
            self.chat_fast.prepended(self.chat_thinking.clone())
        } else {
            self.chat_fast.clone()
        }
    }

    /// Applies `policy` to every image-producing candidate.
    pub fn with_image_retry(mut self, policy: RetryPolicy) -> Self {
        let retune = |order: &CandidateOrder| {
            CandidateOrder::new(
                order
                    .candidates()
                    .iter()
                    .cloned()
                    .map(|c| c.with_retry(policy))
                    .collect(),
            )
        };
        self.standard_image = self.standard_image.with_retry(policy);
        self.pro_image = self.pro_image.with_retry(policy);
        self.image_fallbacks = retune(&self.image_fallbacks);
        self.edit = retune(&self.edit);
        self.synthesize = retune(&self.synthesize);
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.chat_thinking = self.chat_thinking.with_thinking_budget(budget);
        self
    }

    pub fn with_edit(mut self, order: CandidateOrder) -> Self {
        self.edit = order;
        self
    }

    pub fn with_describe(mut self, order: CandidateOrder) -> Self {
        self.describe = order;
        self
    }

    pub fn with_synthesize(mut self, order: CandidateOrder) -> Self {
        self.synthesize = order;
        self
    }

    /// Every `(model id, role)` pair in priority order, duplicates included.
    pub fn supported_models(&self) -> Vec<(String, CandidateRole)> {
        let mut models = Vec::new();
        let mut add = |order: &CandidateOrder, role: CandidateRole| {
            for candidate in order.candidates() {
                models.push((candidate.id.clone(), role));
            }
        };
        add(&self.generate_order(QualityTier::Pro), CandidateRole::Generate);
        add(&self.edit, CandidateRole::Edit);
        add(&self.describe, CandidateRole::Describe);
        add(&self.synthesize, CandidateRole::Synthesize);
        add(&self.chat_order(true), CandidateRole::Chat);
        models
    }

    pub fn validate(&self) -> Result<()> {
        let lists = [
            ("edit", &self.edit),
            ("describe", &self.describe),
            ("synthesize", &self.synthesize),
            ("chat", &self.chat_fast),
        ];
        for (name, order) in lists {
            if order.is_empty() {
                return Err(GenError::Config(format!(
                    "{} candidate list must not be empty",
                    name
                )));
            }
        }

        let singles = [&self.standard_image, &self.pro_image, &self.chat_thinking];
        let listed = [
            &self.image_fallbacks,
            &self.edit,
            &self.describe,
            &self.synthesize,
            &self.chat_fast,
        ];
        for candidate in singles
            .into_iter()
            .chain(listed.into_iter().flat_map(|order| order.candidates()))
        {
            candidate.retry.validate().map_err(|e| {
                GenError::Config(format!("candidate {}: {}", candidate.id, e))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub bedrock: BedrockConfig,
    pub catalog: ModelCatalog,
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `.env`-style overrides on top of the default catalog.
    pub fn from_env() -> Result<Self> {
        let mut catalog = ModelCatalog::default();

        let parse = |name: &str| -> Result<Option<f64>> {
            match env::var(name) {
                Ok(raw) => raw
                    .trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|e| GenError::Config(format!("{}: {}", name, e))),
                Err(_) => Ok(None),
            }
        };

        let max_attempts = match env::var("GEN_RETRY_MAX_ATTEMPTS") {
            Ok(raw) => Some(raw.trim().parse::<u32>().map_err(|e| {
                GenError::Config(format!("GEN_RETRY_MAX_ATTEMPTS: {}", e))
            })?),
            Err(_) => None,
        };
        let initial_delay = parse("GEN_RETRY_INITIAL_DELAY_MS")?;
        let multiplier = parse("GEN_RETRY_MULTIPLIER")?;
        if max_attempts.is_some() || initial_delay.is_some() || multiplier.is_some() {
            let mut policy = RetryPolicy::default();
            if let Some(n) = max_attempts {
                policy = policy.with_max_attempts(n);
            }
            if let Some(ms) = initial_delay {
                policy = policy.with_initial_delay(Duration::from_millis(ms as u64));
            }
            if let Some(m) = multiplier {
                policy = policy.with_multiplier(m);
            }
            policy.validate()?;
            log::debug!("Image retry policy overridden from environment: {:?}", policy);
            catalog = catalog.with_image_retry(policy);
        }

        if let Some(budget) = parse("GEN_THINKING_BUDGET")? {
            catalog = catalog.with_thinking_budget(budget as u32);
        }

        Ok(OrchestratorConfig {
            bedrock: BedrockConfig::from_env(),
            catalog,
        })
    }

    pub fn with_bedrock(mut self, config: BedrockConfig) -> Self {
        self.bedrock = config;
        self
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_generate_order_has_six_rungs() {
        let catalog = ModelCatalog::default();
        let order = catalog.generate_order(QualityTier::Pro);
        assert_eq!(
            order.ids(),
            vec![
                "amazon.nova-canvas-v1:0",
                "amazon.titan-image-generator-v2:0",
                "stability.sd3-5-large-v1:0",
                "stability.stable-image-core-v1:1",
                "stability.stable-image-ultra-v1:1",
                "amazon.titan-image-generator-v1",
            ]
        );
        assert!(order.candidates()[0].supports_resolution_control);
    }

    #[test]
    fn standard_generate_order_starts_with_standard_model() {
        let order = ModelCatalog::default().generate_order(QualityTier::Standard);
        assert_eq!(order.len(), 5);
        assert!(order.is_primary("amazon.titan-image-generator-v2:0"));
    }

    #[test]
    fn thinking_chat_prepends_reasoning_candidate() {
        let catalog = ModelCatalog::default().with_thinking_budget(1024);
        let fast = catalog.chat_order(false);
        let thinking = catalog.chat_order(true);
        assert_eq!(thinking.len(), fast.len() + 1);
        assert_eq!(thinking.candidates()[0].thinking_budget, Some(1024));
        assert_eq!(&thinking.ids()[1..], &fast.ids()[..]);
    }

    #[test]
    fn edit_has_three_image_capable_rungs() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.edit.len(), 3);
        assert!(catalog.edit.candidates().iter().all(|c| c.supports_image_input));
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn image_retry_override_reaches_every_image_list() {
        let policy = RetryPolicy::none();
        let catalog = ModelCatalog::default().with_image_retry(policy);
        assert!(catalog
            .generate_order(QualityTier::Pro)
            .candidates()
            .iter()
            .chain(catalog.edit.candidates())
            .chain(catalog.synthesize.candidates())
            .all(|c| c.retry == policy));
        assert_ne!(catalog.describe.candidates()[0].retry, policy);
    }

    #[test]
    fn supported_models_lists_every_role_in_priority_order() {
        let models = ModelCatalog::default().supported_models();
        assert_eq!(
            models[0],
            ("amazon.nova-canvas-v1:0".to_string(), CandidateRole::Generate)
        );
        assert!(models
            .iter()
            .any(|(id, role)| id == "anthropic.claude-3-haiku-20240307-v1:0"
                && *role == CandidateRole::Describe));
        let chat: Vec<_> = models
            .iter()
            .filter(|(_, role)| *role == CandidateRole::Chat)
            .collect();
        assert_eq!(chat.len(), 4);
        assert_eq!(chat[0].0, "us.anthropic.claude-3-7-sonnet-20250219-v1:0");
    }

    #[test]
    fn shrinking_retry_multiplier_fails_validation() {
        let catalog =
            ModelCatalog::default().with_image_retry(RetryPolicy::new().with_multiplier(-1.0));
        assert!(matches!(catalog.validate(), Err(GenError::Config(_))));
    }

    #[test]
    fn env_overrides_reject_unusable_retry_values() {
        env::set_var("GEN_RETRY_MULTIPLIER", "-1");
        let negative = OrchestratorConfig::from_env();
        env::set_var("GEN_RETRY_MULTIPLIER", "NaN");
        let nan = OrchestratorConfig::from_env();
        env::set_var("GEN_RETRY_MULTIPLIER", "2");
        env::set_var("GEN_RETRY_MAX_ATTEMPTS", "200");
        let many = OrchestratorConfig::from_env();
        env::remove_var("GEN_RETRY_MULTIPLIER");
        env::remove_var("GEN_RETRY_MAX_ATTEMPTS");

        assert!(matches!(negative, Err(GenError::Config(_))));
        assert!(matches!(nan, Err(GenError::Config(_))));
        let many = many.unwrap();
        let policy = many.catalog.pro_image.retry;
        assert_eq!(policy.max_attempts, 200);
        assert!(policy.delays().all(|d| d <= policy.max_delay));
        assert!(many.catalog.validate().is_ok());
    }

    #[test]
    fn empty_lists_fail_validation() {
        let catalog = ModelCatalog::default().with_edit(CandidateOrder::default());
        assert!(matches!(catalog.validate(), Err(GenError::Config(_))));
    }
}
