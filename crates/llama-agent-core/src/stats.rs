use llama_agent_llm::CompletionTimings;
use serde::{Deserialize, Serialize};

/// Running token and timing counters for one agent loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_input: i64,
    pub total_output: i64,
    pub total_cached: i64,
    pub total_prompt_ms: f64,
    pub total_predicted_ms: f64,
    /// Prompt + generated tokens of the most recent completion.
    pub current_context_tokens: i64,
    /// Total context window, reported by the backend.
    pub n_ctx: i64,
    warned_70: bool,
    warned_80: bool,
}

/// One-shot context-usage warning emitted by [`SessionStats::update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextWarning {
    pub threshold_pct: u8,
    pub used_tokens: i64,
    pub total_tokens: i64,
}

impl SessionStats {
    /// Fold one completion's timings into the running totals. Returns a
    /// warning the first time usage crosses 70% and again at 80%; each fires
    /// at most once for the life of the loop.
    pub fn update(&mut self, timings: &CompletionTimings, n_ctx: i64) -> Option<ContextWarning> {
        self.total_input += timings.prompt_n;
        self.total_output += timings.predicted_n;
        self.total_cached += timings.cached_n;
        self.total_prompt_ms += timings.prompt_ms;
        self.total_predicted_ms += timings.predicted_ms;
        self.current_context_tokens = timings.prompt_n + timings.predicted_n;
        self.n_ctx = n_ctx;

        if n_ctx <= 0 {
            return None;
        }
        let used_pct = self.current_context_tokens * 100 / n_ctx;
        if used_pct >= 80 && !self.warned_80 {
            self.warned_80 = true;
            self.warned_70 = true;
            return Some(self.warning(80));
        }
        if used_pct >= 70 && !self.warned_70 {
            self.warned_70 = true;
            return Some(self.warning(70));
        }
        None
    }

    fn warning(&self, threshold_pct: u8) -> ContextWarning {
        ContextWarning {
            threshold_pct,
            used_tokens: self.current_context_tokens,
            total_tokens: self.n_ctx,
        }
    }
}
