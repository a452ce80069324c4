use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::sources::{HttpIntelligenceSource, SyntheticIntelligenceSource};
use super::{IntelligenceGatherer, IntelligenceGathererBuilder, SignalScreen};

/// Root of an intelligence-sources TOML document.
///
/// ```toml
/// [screening]
/// min_relevance = 0.3
/// max_signals = 8
///
/// [[sources]]
/// kind = "synthetic"
/// seed = 42
///
/// [[sources]]
/// kind = "http"
/// name = "scan-api"
/// url = "https://intel.example/api/signals"
/// timeout_ms = 4000
/// ```
#[derive(Debug, Deserialize)]
pub struct SourcesDocument {
    /// Screening bounds applied to merged bundles.
    #[serde(default)]
    pub screening: ScreeningConfig,
    /// Configured sources, in gathering order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Screening bounds section.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScreeningConfig {
    /// Relevance floor for trend signals.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
    /// Per-list signal cap.
    #[serde(default = "default_max_signals")]
    pub max_signals: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            min_relevance: default_min_relevance(),
            max_signals: default_max_signals(),
        }
    }
}

/// One configured source entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Offline jittered source.
    Synthetic {
        /// Fixed seed for reproducible output.
        seed: Option<u64>,
        /// Set false to keep the entry without gathering from it.
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
    /// JSON endpoint source.
    Http {
        /// Name used in telemetry and failure strings.
        name: String,
        /// Endpoint queried with `domain` and `keywords` parameters.
        url: String,
        /// Request timeout in milliseconds.
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        /// Optional bearer token.
        auth_token: Option<String>,
        /// Set false to keep the entry without gathering from it.
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
}

impl SourcesDocument {
    /// Reads and validates a TOML document.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading intelligence sources {}", path.display()))?;
        let document: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing intelligence sources {}", path.display()))?;
        document.validate()?;
        Ok(document)
    }

    /// Builds a gatherer from the configured sources.
    pub fn into_gatherer(self) -> Result<IntelligenceGatherer> {
        let screen = SignalScreen::new(self.screening.min_relevance, self.screening.max_signals)?;
        let mut builder = IntelligenceGathererBuilder::default().screen(screen);
        for source in self.sources {
            builder = match source {
                SourceConfig::Synthetic { enabled: false, .. }
                | SourceConfig::Http { enabled: false, .. } => builder,
                SourceConfig::Synthetic { seed, .. } => builder.source(
                    seed.map_or_else(SyntheticIntelligenceSource::new, SyntheticIntelligenceSource::seeded),
                ),
                SourceConfig::Http {
                    name,
                    url,
                    timeout_ms,
                    auth_token,
                    ..
                } => {
                    let mut http = HttpIntelligenceSource::new(
                        name,
                        url,
                        Duration::from_millis(timeout_ms),
                    )?;
                    if let Some(token) = auth_token {
                        http = http.with_auth_token(token);
                    }
                    builder.source(http)
                }
            };
        }
        Ok(builder.build())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.screening.min_relevance) {
            bail!(
                "screening.min_relevance {} outside [0, 1]",
                self.screening.min_relevance
            );
        }
        if self.screening.max_signals == 0 {
            bail!("screening.max_signals must be at least 1");
        }
        for source in &self.sources {
            if let SourceConfig::Http { name, url, .. } = source {
                if url.trim().is_empty() {
                    bail!("http source {name} has an empty url");
                }
            }
        }
        Ok(())
    }
}

const fn default_min_relevance() -> f64 {
    super::DEFAULT_MIN_RELEVANCE
}

const fn default_max_signals() -> usize {
    super::DEFAULT_MAX_SIGNALS
}

const fn default_enabled() -> bool {
    true
}

const fn default_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_sources_with_defaults() {
        let (_dir, path) = write_config(
            r#"
[[sources]]
kind = "synthetic"
seed = 42

[[sources]]
kind = "http"
name = "scan-api"
url = "https://intel.example/api/signals"
"#,
        );

        let document = SourcesDocument::load(&path).unwrap();
        assert_eq!(document.sources.len(), 2);
        assert!((document.screening.min_relevance - 0.2).abs() < f64::EPSILON);
        assert_eq!(document.screening.max_signals, 16);

        let gatherer = document.into_gatherer().unwrap();
        assert_eq!(gatherer.source_names(), vec!["synthetic", "scan-api"]);
    }

    #[test]
    fn disabled_sources_are_skipped() {
        let (_dir, path) = write_config(
            r#"
[[sources]]
kind = "http"
name = "scan-api"
url = "https://intel.example/api/signals"
enabled = false
"#,
        );

        let gatherer = SourcesDocument::load(&path).unwrap().into_gatherer().unwrap();
        // With every entry disabled the builder seeds its synthetic fallback.
        assert_eq!(gatherer.source_names(), vec!["synthetic"]);
    }

    #[test]
    fn rejects_out_of_range_screening() {
        let (_dir, path) = write_config(
            r#"
[screening]
min_relevance = 1.4
"#,
        );
        let err = SourcesDocument::load(&path).unwrap_err();
        assert!(err.to_string().contains("min_relevance"));
    }

    #[test]
    fn rejects_empty_http_url() {
        let (_dir, path) = write_config(
            r#"
[[sources]]
kind = "http"
name = "scan-api"
url = "  "
"#,
        );
        assert!(SourcesDocument::load(&path).is_err());
    }
}
