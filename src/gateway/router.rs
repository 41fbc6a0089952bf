//! Request router: turns free-form prompt text into a [`NormalizedRequest`]
//!
//! Recognised inline parameters:
//!
//! - backend hints: `@alias`
//! - sizes: `1024x768`, `1024×768`, `1024*768`, `size:<WxH|preset>`, the
//!   unambiguous presets (`square`, `landscape`, `portrait`, `ultrawide`,
//!   `hd`, `4k`) and their Chinese equivalents
//! - styles: `style:<name>`, `风格:<name>`, `<name>风格`, `做成<name>` and the
//!   Chinese keyword table
//! - counts: `3 images`, `3 pics`, `3张`, `3幅`, `3个`, `生成3`, `画3`
//! - seeds: `seed:42`, `seed=42`, `seed 42`, `种子:42`
//! - quality: `draft`, `standard`, `hq`, `quality:<level>`, Chinese keywords
//! - negative prompt: text after a configured marker, up to the next clause
//!   separator
//!
//! Everything not consumed by one of the above is the prompt.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::traits::{ImageSize, NormalizedRequest, Quality};
use crate::config::{BackendConfig, ParserConfig};
use crate::error::{AppError, Result};

const CHINESE_SIZES: &[(&str, ImageSize)] = &[
    ("正方形", ImageSize::new(1024, 1024)),
    ("方形", ImageSize::new(1024, 1024)),
    ("横版", ImageSize::new(1792, 1024)),
    ("横图", ImageSize::new(1792, 1024)),
    ("竖版", ImageSize::new(1024, 1792)),
    ("竖图", ImageSize::new(1024, 1792)),
    ("超宽", ImageSize::new(1792, 1024)),
    ("高清", ImageSize::new(1024, 1024)),
    ("小图", ImageSize::new(512, 512)),
    ("中图", ImageSize::new(768, 768)),
    ("大图", ImageSize::new(1024, 1024)),
    ("超大", ImageSize::new(1536, 1536)),
];

const STYLE_KEYWORDS: &[(&str, &str)] = &[
    ("写实", "realistic"),
    ("卡通", "cartoon"),
    ("动漫", "anime"),
    ("油画", "oil_painting"),
    ("水彩", "watercolor"),
    ("素描", "sketch"),
    ("黑白", "black_white"),
    ("赛博朋克", "cyberpunk"),
    ("蒸汽朋克", "steampunk"),
    ("简约", "minimalist"),
    ("抽象", "abstract"),
    ("科幻", "sci_fi"),
    ("奇幻", "fantasy"),
    ("恐怖", "horror"),
    ("可爱", "cute"),
    ("清新", "fresh"),
    ("暗黑", "dark"),
    ("明亮", "bright"),
    ("梦幻", "dreamy"),
    ("复古", "vintage"),
    ("现代", "modern"),
    ("古典", "classical"),
];

// Longer keywords first so 最高质量 is not read as 高质量
const QUALITY_KEYWORDS: &[(&str, Quality)] = &[
    ("最高质量", Quality::High),
    ("高质量", Quality::High),
    ("标准质量", Quality::Standard),
    ("精细", Quality::High),
    ("快速", Quality::Draft),
    ("粗糙", Quality::Draft),
];

/// Size presets by name
fn size_preset(name: &str) -> Option<ImageSize> {
    match name.to_lowercase().as_str() {
        "square" | "hd" => Some(ImageSize::new(1024, 1024)),
        "landscape" | "ultrawide" => Some(ImageSize::new(1792, 1024)),
        "portrait" => Some(ImageSize::new(1024, 1792)),
        "small" => Some(ImageSize::new(512, 512)),
        "medium" => Some(ImageSize::new(768, 768)),
        "large" => Some(ImageSize::new(1024, 1024)),
        "xlarge" => Some(ImageSize::new(1536, 1536)),
        "4k" => Some(ImageSize::new(2048, 2048)),
        other => CHINESE_SIZES
            .iter()
            .find(|(keyword, _)| *keyword == other)
            .map(|(_, size)| *size),
    }
}

fn style_keyword(name: &str) -> Option<&'static str> {
    STYLE_KEYWORDS
        .iter()
        .find(|(keyword, _)| *keyword == name)
        .map(|(_, style)| *style)
}

fn quality_keyword(name: &str) -> Option<Quality> {
    QUALITY_KEYWORDS
        .iter()
        .find(|(keyword, _)| *keyword == name)
        .map(|(_, quality)| *quality)
}

fn invalid(message: impl Into<String>) -> AppError {
    AppError::InvalidRequest(message.into())
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| AppError::Internal(format!("bad router pattern '{}': {}", pattern, e)))
}

/// `(kw1|kw2|...)` over the keys of a keyword table
fn alternation<T>(table: &[(&str, T)]) -> String {
    let keywords: Vec<String> = table.iter().map(|(k, _)| regex::escape(k)).collect();
    format!("({})", keywords.join("|"))
}

/// Extraction patterns, compiled once per router
#[derive(Debug)]
struct Patterns {
    negatives: Vec<Regex>,
    hint: Regex,
    size_marker: Regex,
    dimensions: Regex,
    size_keyword: Regex,
    size_word: Regex,
    style_marker: Regex,
    style_phrases: Vec<Regex>,
    style_keyword: Regex,
    quality_marker: Regex,
    quality_keyword: Regex,
    quality_word: Regex,
    seed: Regex,
    counts: Vec<Regex>,
    separators: Regex,
    spaces: Regex,
}

impl Patterns {
    fn compile(negative_markers: &[String]) -> Result<Self> {
        let negatives = negative_markers
            .iter()
            .filter(|m| !m.is_empty())
            .map(|m| compile(&format!(r"(?i){}\s*([^，,。；;]*)", regex::escape(m))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            negatives,
            hint: compile(r"@([^\s@，,。；;]+)")?,
            size_marker: compile(r"(?i)\bsize\s*[:：=]\s*([^\s，,。；;]+)")?,
            dimensions: compile(r"([0-9]+)[xX×*]([0-9]+)")?,
            size_keyword: compile(&alternation(CHINESE_SIZES))?,
            size_word: compile(r"(?i)\b(square|landscape|portrait|ultrawide|hd|4k)\b")?,
            style_marker: compile(r"(?i)(?:\bstyle|风格|样式)\s*[:：=]\s*([^\s，,。；;]+)")?,
            style_phrases: vec![
                compile(r"([^\s，,。；;@]+?)(?:风格|样式)")?,
                compile(r"(?:做成|制作成|设计成)\s*([^\s，,。；;]+)")?,
            ],
            style_keyword: compile(&alternation(STYLE_KEYWORDS))?,
            quality_marker: compile(r"(?i)\bquality\s*[:：=]\s*([^\s，,。；;]+)")?,
            quality_keyword: compile(&alternation(QUALITY_KEYWORDS))?,
            quality_word: compile(r"(?i)\b(draft|standard|hq)\b")?,
            seed: compile(r"(?i)(?:seed|种子)\s*[:：=]?\s*([0-9]+)")?,
            counts: vec![
                compile(r"([0-9]+)\s*[张个幅]")?,
                compile(r"(?:生成|画)\s*([0-9]+)")?,
                compile(r"(?i)\b([0-9]+)\s*(?:images?|pics?)\b")?,
            ],
            separators: compile(r"[，,。；;]+")?,
            spaces: compile(r"\s+")?,
        })
    }
}

/// Remove the first match of `re` from `text`, returning its capture groups
fn take_match(re: &Regex, text: &mut String) -> Option<Vec<String>> {
    let (range, groups) = {
        let caps = re.captures(text.as_str())?;
        let whole = caps.get(0)?;
        let groups = caps
            .iter()
            .skip(1)
            .map(|g| g.map_or_else(String::new, |m| m.as_str().to_string()))
            .collect();
        (whole.range(), groups)
    };
    text.replace_range(range, " ");
    Some(groups)
}

/// First capture group of the first match, removed from `text`
fn take_value(re: &Regex, text: &mut String) -> Option<String> {
    take_match(re, text).and_then(|groups| groups.into_iter().next())
}

/// Parameters pulled out of the text so far
#[derive(Debug, Default)]
struct Extracted {
    backend: Option<String>,
    size: Option<ImageSize>,
    style: Option<String>,
    count: Option<u32>,
    quality: Option<Quality>,
    seed: Option<u64>,
    negative: Vec<String>,
}

/// Request router
#[derive(Debug, Clone)]
pub struct RequestRouter {
    config: ParserConfig,
    aliases: HashMap<String, String>,
    default_size: ImageSize,
    patterns: Arc<Patterns>,
}

impl RequestRouter {
    /// Build a router knowing every configured backend. Each backend id and
    /// its declared aliases become `@` hints, as do the parser's own aliases.
    pub fn new(config: ParserConfig, backends: &[BackendConfig]) -> Result<Self> {
        let mut aliases = HashMap::new();
        for backend in backends {
            aliases.insert(backend.id.to_lowercase(), backend.id.clone());
            for alias in &backend.aliases {
                aliases.insert(alias.to_lowercase(), backend.id.clone());
            }
        }
        for (alias, id) in &config.aliases {
            aliases.insert(alias.to_lowercase(), id.clone());
        }

        let default_size: ImageSize = config.default_size.parse()?;

        if let Some(default) = &config.default_backend {
            if !backends.iter().any(|b| &b.id == default) {
                return Err(AppError::Config(config::ConfigError::Message(format!(
                    "parser.default_backend '{}' is not a configured backend",
                    default
                ))));
            }
        }

        let patterns = Arc::new(Patterns::compile(&config.negative_markers)?);

        Ok(Self {
            config,
            aliases,
            default_size,
            patterns,
        })
    }

    /// Resolve a hint to a backend id
    pub fn resolve_alias(&self, alias: &str) -> Option<&str> {
        self.aliases.get(&alias.to_lowercase()).map(String::as_str)
    }

    /// Parse raw text into a validated request
    pub fn parse(&self, raw: &str) -> Result<NormalizedRequest> {
        let mut text = raw.trim().to_string();
        if text.is_empty() {
            return Err(invalid("prompt must not be empty"));
        }

        let mut found = Extracted::default();

        // Negative clauses first so their words never leak into other parameters
        self.take_negative(&mut text, &mut found);
        self.take_hints(&mut text, &mut found)?;
        self.take_size(&mut text, &mut found)?;
        self.take_style(&mut text, &mut found);
        self.take_quality(&mut text, &mut found)?;
        self.take_seed(&mut text, &mut found)?;
        self.take_count(&mut text, &mut found)?;

        if found.size.is_none() {
            found.size = take_value(&self.patterns.size_word, &mut text).and_then(|w| size_preset(&w));
        }
        if found.quality.is_none() {
            if let Some(word) = take_value(&self.patterns.quality_word, &mut text) {
                found.quality = Some(word.parse()?);
            }
        }

        let prompt = self.patterns.separators.replace_all(&text, " ");
        let prompt = self.patterns.spaces.replace_all(&prompt, " ").trim().to_string();

        self.build(prompt, found)
    }

    fn take_negative(&self, text: &mut String, found: &mut Extracted) {
        for re in &self.patterns.negatives {
            for caps in re.captures_iter(text.as_str()) {
                if let Some(clause) = caps.get(1).map(|m| m.as_str().trim()) {
                    if !clause.is_empty() {
                        found.negative.push(clause.to_string());
                    }
                }
            }
            *text = re.replace_all(text.as_str(), " ").into_owned();
        }
    }

    fn take_hints(&self, text: &mut String, found: &mut Extracted) -> Result<()> {
        for caps in self.patterns.hint.captures_iter(text.as_str()) {
            let alias = &caps[1];
            let id = self
                .resolve_alias(alias)
                .ok_or_else(|| invalid(format!("unknown backend hint '@{}'", alias)))?;
            if found.backend.is_none() {
                debug!(alias = %alias, backend = %id, "Backend hint");
                found.backend = Some(id.to_string());
            }
        }
        *text = self.patterns.hint.replace_all(text.as_str(), " ").into_owned();
        Ok(())
    }

    fn take_size(&self, text: &mut String, found: &mut Extracted) -> Result<()> {
        if let Some(value) = take_value(&self.patterns.size_marker, text) {
            found.size = Some(parse_size_value(&value)?);
            return Ok(());
        }

        if let Some(groups) = take_match(&self.patterns.dimensions, text) {
            found.size = Some(format!("{}x{}", groups[0], groups[1]).parse()?);
            return Ok(());
        }

        found.size = take_value(&self.patterns.size_keyword, text).and_then(|k| size_preset(&k));
        Ok(())
    }

    fn take_style(&self, text: &mut String, found: &mut Extracted) {
        let named = take_value(&self.patterns.style_marker, text).or_else(|| {
            self.patterns
                .style_phrases
                .iter()
                .find_map(|re| take_value(re, text))
        });

        found.style = match named {
            Some(value) => Some(style_keyword(&value).map(str::to_string).unwrap_or(value)),
            None => take_value(&self.patterns.style_keyword, text)
                .and_then(|k| style_keyword(&k))
                .map(str::to_string),
        };
    }

    fn take_quality(&self, text: &mut String, found: &mut Extracted) -> Result<()> {
        if let Some(value) = take_value(&self.patterns.quality_marker, text) {
            found.quality = Some(value.parse()?);
        } else {
            found.quality = take_value(&self.patterns.quality_keyword, text).and_then(|k| quality_keyword(&k));
        }
        Ok(())
    }

    fn take_seed(&self, text: &mut String, found: &mut Extracted) -> Result<()> {
        if let Some(digits) = take_value(&self.patterns.seed, text) {
            let seed = digits
                .parse()
                .map_err(|_| invalid(format!("seed '{}' is out of range", digits)))?;
            found.seed = Some(seed);
        }
        Ok(())
    }

    fn take_count(&self, text: &mut String, found: &mut Extracted) -> Result<()> {
        for re in &self.patterns.counts {
            if let Some(digits) = take_value(re, text) {
                debug!(count = %digits, "Count");
                found.count = Some(parse_count(&digits)?);
                break;
            }
        }
        Ok(())
    }

    fn build(&self, prompt: String, found: Extracted) -> Result<NormalizedRequest> {
        if prompt.is_empty() {
            return Err(invalid("prompt is empty once parameters are removed"));
        }

        let size = found.size.unwrap_or(self.default_size);
        let mut builder = NormalizedRequest::builder(prompt)
            .size(size.width, size.height)
            .count(found.count.unwrap_or(1))
            .quality(found.quality.unwrap_or_default());

        if !found.negative.is_empty() {
            builder = builder.negative_prompt(found.negative.join(", "));
        }
        if let Some(style) = found.style {
            builder = builder.style(style);
        }
        if let Some(seed) = found.seed {
            builder = builder.seed(seed);
        }
        if let Some(backend) = found.backend.or_else(|| self.config.default_backend.clone()) {
            builder = builder.preferred_backend(backend);
        }

        let request = builder.build()?;
        self.validate(&request)?;
        Ok(request)
    }

    /// Enforce the configured size and count limits
    pub fn validate(&self, request: &NormalizedRequest) -> Result<()> {
        let size = request.size();
        let (min, max) = (self.config.min_dimension, self.config.max_dimension);
        if size.width < min || size.height < min || size.width > max || size.height > max {
            return Err(invalid(format!(
                "size {} is outside {}..={} pixels per side",
                size, min, max
            )));
        }

        if request.count() == 0 || request.count() > self.config.max_count {
            return Err(invalid(format!(
                "count {} is outside 1..={}",
                request.count(),
                self.config.max_count
            )));
        }
        Ok(())
    }

    pub fn default_size(&self) -> ImageSize {
        self.default_size
    }

    pub fn default_backend(&self) -> Option<&str> {
        self.config.default_backend.as_deref()
    }
}

fn parse_size_value(value: &str) -> Result<ImageSize> {
    size_preset(value)
        .map(Ok)
        .unwrap_or_else(|| value.parse())
}

fn parse_count(digits: &str) -> Result<u32> {
    digits
        .parse()
        .map_err(|_| invalid(format!("count '{}' is out of range", digits)))
}
