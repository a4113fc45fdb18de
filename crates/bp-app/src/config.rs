use std::env;

use anyhow::{Context, bail};
use bp_core::CanvasSpec;

/// Everything the pipeline needs from the environment, read exactly once at
/// startup. No other component touches ambient state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openai_api_key: Option<String>,
    pub sd_base_url: Option<String>,
    pub marketplace_email: String,
    pub marketplace_password: String,
    pub webdriver_url: String,
    pub canvas: CanvasSpec,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty());
        let sd_base_url = env::var("SD_BASE_URL").ok().filter(|v| !v.is_empty());
        if openai_api_key.is_none() && sd_base_url.is_none() {
            bail!("no image provider configured: set OPENAI_API_KEY and/or SD_BASE_URL");
        }

        let marketplace_email =
            env::var("RB_EMAIL").context("no marketplace credentials: RB_EMAIL not set")?;
        let marketplace_password =
            env::var("RB_PASS").context("no marketplace credentials: RB_PASS not set")?;

        let webdriver_url = env::var("WEBDRIVER_URL")
            .unwrap_or_else(|_| "http://localhost:4444".to_string());

        let width = dimension("TARGET_WIDTH", bp_core::PRINT_WIDTH)?;
        let height = dimension("TARGET_HEIGHT", bp_core::PRINT_HEIGHT)?;

        Ok(Self {
            openai_api_key,
            sd_base_url,
            marketplace_email,
            marketplace_password,
            webdriver_url,
            canvas: CanvasSpec::new(width, height),
        })
    }
}

fn dimension(var: &str, default: u32) -> anyhow::Result<u32> {
    match env::var(var) {
        Ok(value) => {
            let parsed: u32 = value
                .parse()
                .with_context(|| format!("{var} must be a number, got `{value}`"))?;
            if parsed == 0 {
                bail!("{var} must be greater than zero");
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}
