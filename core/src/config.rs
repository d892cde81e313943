use crate::types::CoverageCategory;
use serde::{Deserialize, Serialize};

/// One row of the deduction-code → coverage-category table.
/// A code matches when any of its `_`/`-`/space separated tokens equals `marker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeMarker {
    pub marker: String,
    pub category: CoverageCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Ordered: the first matching marker wins.
    pub code_markers: Vec<CodeMarker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryGuardConfig {
    /// Whole-word, case-insensitive blacklist.
    pub forbidden_keywords: Vec<String>,
    /// Tables that carry a tenant column and get a tenant filter injected.
    pub tenant_scoped_tables: Vec<String>,
    pub tenant_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-call bound on the translation capability.
    pub translation_timeout_secs: u64,
    /// Caller-facing deadline for one whole question.
    pub overall_timeout_secs: u64,
    /// Corrections allowed when the caller does not say otherwise.
    pub default_max_retries: u32,
    /// Rows shown to the summariser.
    pub summary_row_sample: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct CodeCategoriesFile {
    markers: Vec<CodeMarker>,
}

#[derive(Debug, Clone, Deserialize)]
struct GuardFile {
    forbidden_keywords: Vec<String>,
    tenant_scoped_tables: Vec<String>,
    #[serde(default)]
    tenant_column: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub reconciliation: ReconciliationConfig,
    pub query_guard: QueryGuardConfig,
    pub translation: TranslationConfig,
    pub orchestrator: OrchestratorConfig,
}

impl AppConfig {
    /// Load from the data/ directory, then apply environment overrides.
    /// In tests, use AppConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let mut cfg = Self::default_test();

        let codes_path = format!("{data_dir}/reconciliation/code_categories.json");
        let codes_content = std::fs::read_to_string(&codes_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {codes_path}: {e}"))?;
        let codes_file: CodeCategoriesFile = serde_json::from_str(&codes_content)?;
        if codes_file.markers.is_empty() {
            anyhow::bail!("{codes_path} defines no code markers");
        }
        cfg.reconciliation.code_markers = codes_file.markers;

        let guard_path = format!("{data_dir}/query/guard.json");
        let guard_content = std::fs::read_to_string(&guard_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {guard_path}: {e}"))?;
        let guard_file: GuardFile = serde_json::from_str(&guard_content)?;
        cfg.query_guard.forbidden_keywords = guard_file.forbidden_keywords;
        cfg.query_guard.tenant_scoped_tables = guard_file.tenant_scoped_tables;
        if let Some(column) = guard_file.tenant_column {
            cfg.query_guard.tenant_column = column;
        }

        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.translation.model = model;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            self.translation.base_url = url;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.translation.api_key = Some(key);
            }
        }
        if let Some(secs) = std::env::var("TRANSLATION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.orchestrator.translation_timeout_secs = secs;
        }
    }

    /// Built-in defaults, no file or environment access.
    pub fn default_test() -> Self {
        use CoverageCategory::*;
        let markers = [
            ("HSA", Hsa),
            ("FSA", Fsa),
            ("MED", Medical),
            ("MEDICAL", Medical),
            ("DEN", Dental),
            ("DENTAL", Dental),
            ("VIS", Vision),
            ("VISION", Vision),
            ("LIFE", Life),
            ("STD", Disability),
            ("LTD", Disability),
            ("DIS", Disability),
            ("DISABILITY", Disability),
            ("401K", Retirement),
            ("403B", Retirement),
            ("RET", Retirement),
            ("RETIREMENT", Retirement),
        ];

        Self {
            reconciliation: ReconciliationConfig {
                code_markers: markers
                    .iter()
                    .map(|(marker, category)| CodeMarker {
                        marker: (*marker).into(),
                        category: *category,
                    })
                    .collect(),
            },
            query_guard: QueryGuardConfig {
                forbidden_keywords: [
                    "DROP", "DELETE", "UPDATE", "INSERT", "CREATE", "ALTER", "TRUNCATE",
                    "EXEC", "EXECUTE", "CALL", "PROCEDURE", "GRANT", "REVOKE", "MERGE",
                    "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX",
                ]
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
                tenant_scoped_tables: [
                    "employee",
                    "plan",
                    "enrollment",
                    "payroll_batch",
                    "pay_item",
                    "reconciliation_run",
                    "reconciliation_insights",
                    "ach_transfer",
                    "audit_log",
                ]
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
                tenant_column: "tenant_id".into(),
            },
            translation: TranslationConfig {
                base_url: "https://api.openai.com/v1".into(),
                api_key: None,
                model: "gpt-4o-mini".into(),
                temperature: 0.1,
            },
            orchestrator: OrchestratorConfig {
                translation_timeout_secs: 30,
                overall_timeout_secs: 120,
                default_max_retries: 2,
                summary_row_sample: 20,
            },
        }
    }
}
