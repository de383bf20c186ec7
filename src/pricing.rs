//! Pricing engine (C1).
//!
//! Resolves a model name to a [`PricingEntry`] and turns a [`UsageSnapshot`]
//! into a [`CostBreakdown`]. Resolution is a strictly ordered, deterministic
//! chain of seven strategies (see [`resolve`]) — no scoring, no fuzzy
//! ranking, so cost audits always reproduce the same answer for the same
//! model string.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-token unit prices for one model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl PricingEntry {
    fn new(input: f64, output: f64) -> Self {
        let mut e = PricingEntry {
            input,
            output,
            cache_creation: 0.0,
            cache_read: 0.0,
        };
        e.fill_defaults();
        e
    }

    /// Fill-in rule: cache-creation defaults to 1.25x input, cache-read to
    /// 0.10x input, when left at zero and input is non-zero.
    fn fill_defaults(&mut self) {
        if self.cache_creation == 0.0 && self.input != 0.0 {
            self.cache_creation = self.input * 1.25;
        }
        if self.cache_read == 0.0 && self.input != 0.0 {
            self.cache_read = self.input * 0.10;
        }
    }
}

/// Token counts accumulated for one request.
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    /// Explicit 5-minute / 1-hour cache-creation split, if the upstream
    /// reported one.
    pub cache_creation_split: Option<(i64, i64)>,
}

impl UsageSnapshot {
    /// Adds `other`'s counts into `self`. Never goes negative: any negative
    /// input is floored to zero before accumulating.
    pub fn accumulate(&mut self, other: &UsageSnapshot) {
        self.input_tokens += other.input_tokens.max(0);
        self.output_tokens += other.output_tokens.max(0);
        self.cache_create_tokens += other.cache_create_tokens.max(0);
        self.cache_read_tokens += other.cache_read_tokens.max(0);
        self.reasoning_tokens += other.reasoning_tokens.max(0);
        if let Some((five, hour)) = other.cache_creation_split {
            let (sf, sh) = self.cache_creation_split.unwrap_or((0, 0));
            self.cache_creation_split = Some((sf + five.max(0), sh + hour.max(0)));
        }
    }
}

/// Dollar cost breakdown for one [`UsageSnapshot`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cache_create_cost: f64,
    pub cache_read_cost: f64,
    pub ephemeral_5m_cost: f64,
    pub ephemeral_1h_cost: f64,
    pub total: f64,
    pub has_pricing: bool,
    pub is_long_context: bool,
}

/// 1-hour cache-creation price: an exact-key lookup against the engine's
/// reference table, falling back to a family-substring price when the model
/// isn't one of the explicitly listed keys.
fn ephemeral_1h_price(model: &str) -> f64 {
    if let Some(price) = EPHEMERAL_1H_EXACT.get(model) {
        return *price;
    }
    let m = model.to_lowercase();
    if m.contains("opus") {
        0.00003
    } else if m.contains("sonnet") {
        0.000006
    } else if m.contains("haiku") {
        0.0000016
    } else {
        0.0
    }
}

/// Splits cache-creation tokens into (five_minute, one_hour): if the caller
/// supplied an explicit split, any unaccounted remainder is added to the
/// 5-minute bucket; otherwise all tokens are 5-minute.
fn split_cache_creation(usage: &UsageSnapshot) -> (i64, i64) {
    match usage.cache_creation_split {
        Some((five, hour)) => {
            let accounted = five + hour;
            let remainder = (usage.cache_create_tokens - accounted).max(0);
            (five + remainder, hour)
        }
        None => (usage.cache_create_tokens, 0),
    }
}

/// Computes the cost breakdown for `model` given accumulated `usage`.
pub fn calculate(model: &str, usage: &UsageSnapshot) -> CostBreakdown {
    let resolution = resolve(model);
    let total_input = usage.input_tokens + usage.cache_create_tokens + usage.cache_read_tokens;

    let wants_long_context = model.to_lowercase().contains("[1m]") && total_input > 200_000;
    // An exact key match is required: a "[1m]" model with no listed tier
    // gets no long-context pricing rather than an arbitrary one.
    let long_context_tier = if wants_long_context { LONG_CONTEXT_EXACT.get(model) } else { None };
    let is_long_context = long_context_tier.is_some();

    let (input_price, output_price) = match long_context_tier {
        Some((i, o)) => (*i, *o),
        None => match &resolution {
            Some((entry, _)) => (entry.input, entry.output),
            None => (0.0, 0.0),
        },
    };

    let entry = resolution.as_ref().map(|(e, _)| *e).unwrap_or_default();

    let (five_min_tokens, one_hour_tokens) = split_cache_creation(usage);
    let ephemeral_5m_cost = five_min_tokens as f64 * entry.cache_creation;
    let ephemeral_1h_cost = one_hour_tokens as f64 * ephemeral_1h_price(model);

    let input_cost = usage.input_tokens as f64 * input_price;
    let output_cost = usage.output_tokens as f64 * output_price;
    let cache_create_cost = ephemeral_5m_cost + ephemeral_1h_cost;
    let cache_read_cost = usage.cache_read_tokens as f64 * entry.cache_read;
    let total = input_cost + output_cost + cache_create_cost + cache_read_cost;

    CostBreakdown {
        input_cost,
        output_cost,
        cache_create_cost,
        cache_read_cost,
        ephemeral_5m_cost,
        ephemeral_1h_cost,
        total,
        has_pricing: resolution.is_some() || total > 0.0,
        is_long_context,
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Builds a raw overlay entry: no fill-in defaults applied. The overlay is
/// preserved bit-for-bit from the engine's reference price table, which
/// leaves cache-creation/cache-read at exactly what's written here (often
/// zero) rather than deriving them from the input price.
fn raw(input: f64, output: f64) -> PricingEntry {
    PricingEntry { input, output, cache_creation: 0.0, cache_read: 0.0 }
}

fn raw_cache(input: f64, output: f64, cache_creation: f64, cache_read: f64) -> PricingEntry {
    PricingEntry { input, output, cache_creation, cache_read }
}

/// Hard-coded overlay of current vendor prices. Each arm tests the same
/// substring/prefix conditions, in the same order, as the engine's upstream
/// reference price table; first arm whose condition matches wins. Callers
/// depend on this exact ordering and these exact per-token prices, so the
/// arms below are not to be "cleaned up" or reordered. Unlike the embedded
/// catalog, overlay entries are never run through [`PricingEntry::fill_defaults`] —
/// the reference table's own fields are the whole answer, zero included.
fn hardcoded_pricing(model: &str) -> Option<PricingEntry> {
    let m = model.to_lowercase();
    let c = |s: &str| m.contains(s);

    // Anthropic Claude
    if c("opus-4-5") || c("opus-4.5") || c("opus4.5") || c("opus45") {
        return Some(raw_cache(0.000005, 0.000025, 0.00000625, 0.0000005));
    }
    if c("sonnet-4-5") || c("sonnet-4.5") || c("sonnet4.5") || c("sonnet45") {
        return Some(raw_cache(0.000003, 0.000015, 0.00000375, 0.0000003));
    }
    if c("haiku-4-5") || c("haiku-4.5") || c("haiku4.5") || c("haiku45") {
        return Some(raw_cache(0.000001, 0.000005, 0.00000125, 0.0000001));
    }

    // OpenAI GPT
    if c("gpt-5") && !c("mini") && !c("nano") {
        return Some(raw_cache(0.00000125, 0.00001, 0.0, 0.000000125));
    }
    if c("gpt-5-mini") || c("gpt5-mini") {
        return Some(raw(0.0000003, 0.00000125));
    }
    if c("gpt-5-nano") || c("gpt5-nano") {
        return Some(raw(0.0000001, 0.0000004));
    }
    if c("gpt-4o") && !c("mini") {
        return Some(raw(0.0000025, 0.00001));
    }
    if c("gpt-4o-mini") || c("gpt4o-mini") {
        return Some(raw(0.00000015, 0.0000006));
    }
    if (m == "o1" || m.starts_with("o1-") || c("/o1")) && !c("mini") && !c("pro") {
        return Some(raw(0.000015, 0.00006));
    }
    if c("o1-mini") || c("o1mini") {
        return Some(raw(0.000003, 0.000012));
    }
    if c("o1-pro") || c("o1pro") {
        return Some(raw(0.00015, 0.0006));
    }
    if (m == "o3" || m.starts_with("o3-") || c("/o3")) && !c("mini") {
        return Some(raw(0.00001, 0.00004));
    }
    if c("o3-mini") || c("o3mini") {
        return Some(raw(0.0000011, 0.0000044));
    }

    // Google Gemini
    if c("gemini-3-pro") || c("gemini3pro") || c("gemini-3.0-pro") {
        return Some(raw(0.000002, 0.000012));
    }
    if c("gemini-3-flash") || c("gemini3flash") || c("gemini-3.0-flash") {
        return Some(raw(0.0000005, 0.000003));
    }
    if c("gemini-2.5-pro") || c("gemini2.5pro") || c("gemini-2-5-pro") {
        return Some(raw(0.00000125, 0.00001));
    }
    if c("gemini-2.5-flash") || c("gemini2.5flash") || c("gemini-2-5-flash") {
        return Some(raw(0.0000003, 0.0000025));
    }
    if c("gemini-2.0-flash") || c("gemini2.0flash") || c("gemini-2-0-flash") {
        return Some(raw(0.0000001, 0.0000004));
    }
    if c("gemini-1.5-pro") || c("gemini1.5pro") || c("gemini-1-5-pro") {
        return Some(raw(0.00000125, 0.000005));
    }
    if c("gemini-1.5-flash") || c("gemini1.5flash") || c("gemini-1-5-flash") {
        return Some(raw(0.000000075, 0.0000003));
    }

    // DeepSeek
    if c("deepseek-v3") || c("deepseek-chat") || c("deepseekv3") || c("deepseekchat") {
        return Some(raw_cache(0.00000028, 0.00000042, 0.0, 0.000000028));
    }
    if c("deepseek-r1") || c("deepseek-reasoner") || c("deepseekr1") || c("deepseekreasoner") {
        return Some(raw_cache(0.00000055, 0.00000219, 0.0, 0.000000055));
    }
    if c("deepseek-coder") || c("deepseekcoder") {
        return Some(raw(0.00000014, 0.00000028));
    }

    // Alibaba Qwen (RMB -> USD at ~7.2)
    if c("qwen-max") || c("qwenmax") {
        return Some(raw(0.00000044, 0.00000178));
    }
    if c("qwen-plus") || c("qwenplus") {
        return Some(raw(0.00000011, 0.00000028));
    }
    if c("qwen-turbo") || c("qwen-flash") || c("qwenturbo") || c("qwenflash") {
        return Some(raw(0.00000002, 0.00000021));
    }

    // Zhipu GLM (RMB -> USD at ~7.2)
    if c("glm-4-plus") || c("glm4plus") || c("glm-4plus") {
        return Some(raw(0.00000694, 0.00000694));
    }
    if (c("glm-4") || c("glm4")) && !c("plus") && !c("flash") && !c("air") && !c("v") {
        return Some(raw(0.00001389, 0.00001389));
    }
    if c("glm-4-flash") || c("glm-4-air") || c("glm4flash") || c("glm4air") {
        return Some(raw(0.000000014, 0.000000014));
    }
    if c("glm-4.5") || c("glm-4-5") || c("glm4.5") || c("glm45") {
        return Some(raw(0.00000694, 0.00000694));
    }

    // Mistral
    if c("mistral-large") || c("mistrallarge") {
        return Some(raw(0.000002, 0.000006));
    }
    if c("mistral-medium") || c("mistralmedium") {
        return Some(raw(0.0000027, 0.0000081));
    }
    if c("mistral-small") || c("mistralsmall") {
        return Some(raw(0.0000002, 0.0000006));
    }
    if c("codestral") {
        return Some(raw(0.0000002, 0.0000006));
    }

    // Meta Llama (via cloud providers)
    if c("llama-3.1-405b") || c("llama3.1-405b") || c("llama-3-1-405b") {
        return Some(raw(0.000003, 0.000003));
    }
    if c("llama-3.1-70b") || c("llama3.1-70b") || c("llama-3-1-70b") {
        return Some(raw(0.00000088, 0.00000088));
    }
    if c("llama-3.1-8b") || c("llama3.1-8b") || c("llama-3-1-8b") {
        return Some(raw(0.00000018, 0.00000018));
    }

    None
}

/// Per-model 1-hour cache-creation price, for models whose exact key is
/// listed explicitly. Mirrors the engine's reference table; models not
/// listed here fall back to the family-substring prices in
/// [`ephemeral_1h_price`].
static EPHEMERAL_1H_EXACT: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("claude-opus-4-1", 0.00003),
        ("claude-opus-4-1-20250805", 0.00003),
        ("claude-opus-4", 0.00003),
        ("claude-opus-4-20250514", 0.00003),
        ("claude-3-opus", 0.00003),
        ("claude-3-opus-latest", 0.00003),
        ("claude-3-opus-20240229", 0.00003),
        ("claude-3-5-sonnet", 0.000006),
        ("claude-3-5-sonnet-latest", 0.000006),
        ("claude-3-5-sonnet-20241022", 0.000006),
        ("claude-3-5-sonnet-20240620", 0.000006),
        ("claude-3-sonnet", 0.000006),
        ("claude-3-sonnet-20240307", 0.000006),
        ("claude-sonnet-3", 0.000006),
        ("claude-sonnet-3-5", 0.000006),
        ("claude-sonnet-3-7", 0.000006),
        ("claude-sonnet-4", 0.000006),
        ("claude-sonnet-4-20250514", 0.000006),
        ("claude-3-5-haiku", 0.0000016),
        ("claude-3-5-haiku-latest", 0.0000016),
        ("claude-3-5-haiku-20241022", 0.0000016),
        ("claude-3-haiku", 0.0000016),
        ("claude-3-haiku-20240307", 0.0000016),
        ("claude-haiku-3", 0.0000016),
        ("claude-haiku-3-5", 0.0000016),
    ])
});

/// Exact-key long-context ("[1m]") tiers. Per the engine's design notes, a
/// model carrying the `[1m]` marker with no exact entry here gets no
/// long-context tier rather than an arbitrary one from this map.
static LONG_CONTEXT_EXACT: Lazy<HashMap<&'static str, (f64, f64)>> =
    Lazy::new(|| HashMap::from([("claude-sonnet-4-20250514[1m]", (0.000006, 0.0000225))]));

/// The embedded catalog: canonical model id -> entry, merged from a JSON
/// resource at build time and used as the base lookup before the overlay.
static CATALOG: Lazy<HashMap<String, PricingEntry>> = Lazy::new(|| {
    let raw = include_str!("../resources/model_prices.json");
    let parsed: HashMap<String, CatalogEntry> = serde_json::from_str(raw).unwrap_or_default();
    parsed
        .into_iter()
        .map(|(k, v)| {
            let entry = PricingEntry::new(v.input, v.output);
            (k, entry)
        })
        .collect()
});

#[derive(Deserialize, Default)]
struct CatalogEntry {
    input: f64,
    output: f64,
}

fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | '.' | ':' | '/' | ' '))
        .collect()
}

static NORMALIZED_CATALOG: Lazy<HashMap<String, PricingEntry>> = Lazy::new(|| {
    CATALOG
        .iter()
        .map(|(k, v)| (normalize(k), *v))
        .collect()
});

/// Resolves `model` to a `(PricingEntry, exact_hit)` pair following seven
/// ordered strategies. `exact_hit` is true for strategies 1/2/4/5/6 (an
/// exact key match of some kind) and false for the substring strategies
/// (3, 7).
fn resolve(model: &str) -> Option<(PricingEntry, bool)> {
    // 1. Exact key match.
    if let Some(e) = CATALOG.get(model) {
        return Some((*e, true));
    }

    // 2. Special alias.
    if model == "gpt-5-codex" {
        if let Some(e) = CATALOG.get("gpt-5") {
            return Some((*e, true));
        }
    }

    // 3. Hard-coded overlay, preserved bit-for-bit from the reference table.
    if let Some(entry) = hardcoded_pricing(model) {
        return Some((entry, false));
    }

    // 4. Strip region prefix and retry exact.
    for prefix in ["us.", "eu.", "apac."] {
        if let Some(rest) = model.strip_prefix(prefix) {
            if let Some(e) = CATALOG.get(rest) {
                return Some((*e, true));
            }
        }
    }

    // 5. Strip provider prefix and retry exact.
    if let Some(rest) = model.strip_prefix("anthropic.") {
        if let Some(e) = CATALOG.get(rest) {
            return Some((*e, true));
        }
    }

    // 6. Normalize both sides; retry exact against normalized index.
    let normalized_model = normalize(model);
    if let Some(e) = NORMALIZED_CATALOG.get(&normalized_model) {
        return Some((*e, true));
    }

    // 7. Substring match in either direction over normalized keys.
    for (key, entry) in NORMALIZED_CATALOG.iter() {
        if key.is_empty() {
            continue;
        }
        if normalized_model.contains(key.as_str()) || key.contains(normalized_model.as_str()) {
            return Some((*entry, false));
        }
    }

    None
}
