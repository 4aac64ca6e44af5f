//! Wires the core collaborators from a [`Config`].

use crate::config::{Config, OracleProvider};
use crate::prompt_loader;
use anyhow::{Context, Result};
use panel_core::Command;
use panel_core::config::InterviewConfig;
use panel_core::oracle::{ChatCompletionsOracle, OllamaOracle, QuestionOracle};
use panel_core::persistence::{HttpInterviewStore, InterviewStore};
use panel_core::prompts::PromptSet;
use panel_core::session_state::{PanelBuilder, PanelStateMachine};
use panel_core::speech::SpeechChannel;
use panel_core::turn_clock::{Dice, SeededDice};
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn build_oracle(config: &Config) -> Result<Arc<dyn QuestionOracle>> {
    let oracle: Arc<dyn QuestionOracle> = match config.provider {
        OracleProvider::Ollama => {
            tracing::info!(
                "Using Ollama at {} with model {}",
                config.ollama_url,
                config.oracle_model
            );
            Arc::new(OllamaOracle::new(
                config.ollama_url.clone(),
                config.oracle_model.clone(),
                config.oracle_timeout,
            )?)
        }
        OracleProvider::OpenAI => {
            let api_key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY must be set for 'openai' provider")?;
            tracing::info!("Using chat completions with model {}", config.oracle_model);
            Arc::new(ChatCompletionsOracle::new(
                ChatCompletionsOracle::DEFAULT_BASE_URL.to_string(),
                api_key,
                config.oracle_model.clone(),
                config.oracle_timeout,
            )?)
        }
    };
    Ok(oracle)
}

/// `None` when no interview API is configured.
pub fn build_store(config: &Config) -> Result<Option<Arc<dyn InterviewStore>>> {
    let Some(url) = &config.persistence_url else {
        tracing::info!("PERSISTENCE_URL not set; finished interviews will not be saved");
        return Ok(None);
    };
    let store = HttpInterviewStore::new(
        url.clone(),
        config.persistence_token.clone(),
        config.oracle_timeout,
    )?;
    Ok(Some(Arc::new(store)))
}

pub fn build_dice(config: &Config) -> Box<dyn Dice> {
    match config.seed {
        Some(seed) => {
            tracing::info!(seed, "Using seeded panel dice");
            Box::new(SeededDice::from_seed(seed))
        }
        None => Box::new(SeededDice::from_entropy()),
    }
}

/// Collaborators shared by every panel a runtime creates.
#[derive(Clone)]
pub struct PanelFactory {
    config: Config,
    oracle: Arc<dyn QuestionOracle>,
    store: Option<Arc<dyn InterviewStore>>,
    prompts: PromptSet,
}

impl PanelFactory {
    pub fn from_config(config: Config) -> Result<Self> {
        let prompts = prompt_loader::load_prompt_set(&config.prompts_dir)
            .context("Failed to load prompt overrides")?;
        let oracle = build_oracle(&config).context("Failed to build the question oracle")?;
        let store = build_store(&config).context("Failed to build the interview store")?;
        Ok(Self {
            config,
            oracle,
            store,
            prompts,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A builder preloaded with this runtime's oracle, prompts, timing and dice.
    pub fn builder(
        &self,
        interview: InterviewConfig,
        speech: Arc<dyn SpeechChannel>,
        commands: mpsc::Sender<Command>,
    ) -> PanelBuilder {
        PanelStateMachine::builder(self.oracle.clone(), speech, commands)
            .with_interview(interview)
            .with_timing(self.config.timing.clone())
            .with_prompts(self.prompts.clone())
            .with_dice(build_dice(&self.config))
    }

    /// Builds a panel whose finished interviews are saved under `user_id`.
    pub fn panel(
        &self,
        interview: InterviewConfig,
        speech: Arc<dyn SpeechChannel>,
        commands: mpsc::Sender<Command>,
        user_id: &str,
    ) -> PanelStateMachine {
        let builder = self.builder(interview, speech, commands);
        let builder = match &self.store {
            Some(store) => builder.with_store(store.clone(), user_id),
            None => builder,
        };
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn store_is_optional() {
        assert!(build_store(&config(&[])).unwrap().is_none());
        let with_url = config(&[("PERSISTENCE_URL", "http://localhost:3001")]);
        assert!(build_store(&with_url).unwrap().is_some());
    }

    #[test]
    fn seeded_dice_replay() {
        let seeded = config(&[("PANEL_SEED", "9")]);
        let mut a = build_dice(&seeded);
        let mut b = build_dice(&seeded);
        for _ in 0..10 {
            assert_eq!(a.roll(), b.roll());
        }
    }

    #[tokio::test]
    async fn factory_builds_an_idle_panel() {
        let factory = PanelFactory::from_config(config(&[("PROMPTS_DIR", "no_such_prompts_dir")]))
            .unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let speech = Arc::new(panel_core::speech::TranscriptBuffer::new());
        let panel = factory.panel(InterviewConfig::default(), speech, tx, "user-1");
        let session = panel.snapshot().await;
        assert_eq!(session.phase, panel_core::session_state::Phase::Intro);
        assert!(panel.speech_supported());
    }
}
