//! Declarative property extraction over listing and detail pages.
//!
//! A [`PageExtractor`] is compiled once per run from an
//! [`ExtractionConfig`]. Every property is resolved the same way: pick the
//! root (listing element or detail document), narrow it to the first match of
//! the property's selector, apply the parser, trim.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::AppError;
use crate::models::{ExtractionConfig, Parser, PropertyMap, PropertySource};

/// A named parser callback, invoked with the narrowed root element.
pub type ParserFn = Arc<dyn Fn(ElementRef<'_>) -> Result<String, AppError> + Send + Sync>;

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}[-/.]\d{1,2}[-/.]\d{1,2}").expect("valid date pattern"));

/// Callbacks available to `callback` parsers.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    callbacks: HashMap<String, ParserFn>,
}

impl ParserRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `own_text` and `first_date` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("own_text", |el| {
            Ok(el
                .children()
                .filter_map(|node| node.value().as_text())
                .map(|text| &**text)
                .collect::<String>())
        });
        registry.register("first_date", |el| {
            let text: String = el.text().collect();
            DATE_PATTERN
                .find(&text)
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| AppError::ExtractionError(format!("no date in '{}'", text.trim())))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn(ElementRef<'_>) -> Result<String, AppError> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback));
    }

    fn get(&self, name: &str) -> Option<ParserFn> {
        self.callbacks.get(name).cloned()
    }
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("ParserRegistry")
            .field("callbacks", &names)
            .finish()
    }
}

enum CompiledParser {
    Text,
    Html,
    Attr(String),
    Link(String),
    ChildText(usize),
    Callback(String, ParserFn),
}

impl CompiledParser {
    fn compile(parser: Parser, registry: &ParserRegistry) -> Result<Self, AppError> {
        Ok(match parser {
            Parser::Text => CompiledParser::Text,
            Parser::Html => CompiledParser::Html,
            Parser::Attr { name } => CompiledParser::Attr(name),
            Parser::Link { attr } => CompiledParser::Link(attr),
            Parser::ChildText { index } => CompiledParser::ChildText(index),
            Parser::Callback { name } => {
                let callback = registry.get(&name).ok_or_else(|| {
                    AppError::ConfigError(format!("no parser callback named '{name}'"))
                })?;
                CompiledParser::Callback(name, callback)
            }
        })
    }

    /// Apply to the narrowed root. `None` means the selector matched nothing.
    fn apply(&self, target: Option<ElementRef<'_>>, base: Option<&Url>) -> Result<String, String> {
        match self {
            CompiledParser::Text => Ok(target.map(|el| el.text().collect()).unwrap_or_default()),
            CompiledParser::Html => Ok(target.map(|el| el.inner_html()).unwrap_or_default()),
            CompiledParser::Attr(name) => {
                let el = target.ok_or("selector matched nothing")?;
                el.value()
                    .attr(name)
                    .map(str::to_string)
                    .ok_or_else(|| format!("element has no '{name}' attribute"))
            }
            CompiledParser::Link(attr) => {
                let el = target.ok_or("selector matched nothing")?;
                let raw = el
                    .value()
                    .attr(attr)
                    .ok_or_else(|| format!("element has no '{attr}' attribute"))?;
                match base {
                    Some(base) => base
                        .join(raw.trim())
                        .map(|u| u.to_string())
                        .map_err(|e| format!("cannot resolve '{raw}': {e}")),
                    None => Ok(raw.to_string()),
                }
            }
            CompiledParser::ChildText(index) => {
                let el = target.ok_or("selector matched nothing")?;
                let node = el
                    .children()
                    .nth(*index)
                    .ok_or_else(|| format!("element has no child node {index}"))?;
                node.value()
                    .as_text()
                    .map(|text| text.to_string())
                    .ok_or_else(|| format!("child node {index} is not text"))
            }
            CompiledParser::Callback(name, callback) => {
                let el = target.ok_or("selector matched nothing")?;
                callback(el).map_err(|e| format!("callback '{name}' failed: {e}"))
            }
        }
    }
}

struct CompiledProperty {
    name: String,
    selector: Option<Selector>,
    parser: CompiledParser,
}

/// Result of scanning a listing page.
#[derive(Debug, Default)]
pub struct ListScan {
    /// Retained candidates, newest-first (document order).
    pub candidates: Vec<PropertyMap>,
    /// Listing elements evaluated, including the watermark element.
    pub scanned: usize,
    /// Elements dropped by the title filter.
    pub title_filtered: usize,
    /// The scan stopped at the watermark.
    pub reached_watermark: bool,
}

/// Compiled extraction rules for one run.
pub struct PageExtractor {
    item_selector: Selector,
    title_filter: Option<Regex>,
    content_filter: Option<Regex>,
    item_properties: Vec<CompiledProperty>,
    detail_properties: Vec<CompiledProperty>,
    watermark: Option<String>,
}

impl PageExtractor {
    pub fn compile(config: &ExtractionConfig, registry: &ParserRegistry) -> Result<Self, AppError> {
        match config.properties.get("url") {
            Some(def) if def.source == PropertySource::Item => {}
            Some(_) => {
                return Err(AppError::ConfigError(
                    "the 'url' property must have source 'item'".into(),
                ));
            }
            None => {
                return Err(AppError::ConfigError(
                    "a 'url' property is required".into(),
                ));
            }
        }
        if config.title_pattern.is_some() && !config.properties.contains_key("title") {
            return Err(AppError::ConfigError(
                "titlePattern requires a 'title' property".into(),
            ));
        }
        if config.content_pattern.is_some() && !config.properties.contains_key("contentText") {
            return Err(AppError::ConfigError(
                "contentPattern requires a 'contentText' property".into(),
            ));
        }

        let mut item_properties = Vec::new();
        let mut detail_properties = Vec::new();
        for (name, def) in &config.properties {
            let selector = def.selector.as_deref().map(parse_selector).transpose()?;
            let parser = CompiledParser::compile(def.parser()?, registry)?;
            let property = CompiledProperty {
                name: name.clone(),
                selector,
                parser,
            };
            match def.source {
                PropertySource::Item => item_properties.push(property),
                PropertySource::Detail => detail_properties.push(property),
            }
        }

        Ok(Self {
            item_selector: parse_selector(&config.item_selector)?,
            title_filter: config.title_pattern.as_deref().map(parse_regex).transpose()?,
            content_filter: config
                .content_pattern
                .as_deref()
                .map(parse_regex)
                .transpose()?,
            item_properties,
            detail_properties,
            watermark: config.watermark.clone(),
        })
    }

    /// Scan a listing page.
    ///
    /// Stops at the first element whose url equals the watermark; drops (and
    /// continues past) elements whose title fails the title filter.
    pub fn extract_list(&self, html: &str, page_url: &str) -> Result<ListScan, AppError> {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();
        let mut scan = ListScan::default();

        for element in document.select(&self.item_selector) {
            scan.scanned += 1;
            let item = resolve(element, &self.item_properties, base.as_ref())?;

            if let Some(watermark) = &self.watermark {
                if item.get("url") == Some(watermark) {
                    scan.reached_watermark = true;
                    break;
                }
            }
            if let Some(filter) = &self.title_filter {
                let title = item.get("title").map(String::as_str).unwrap_or("");
                if !filter.is_match(title) {
                    tracing::debug!(%title, "Dropped by title filter");
                    scan.title_filtered += 1;
                    continue;
                }
            }
            scan.candidates.push(item);
        }

        Ok(scan)
    }

    /// Merge detail properties into `candidate` without overwriting existing
    /// keys, then apply the content filter. Returns whether it is retained.
    pub fn extract_detail(
        &self,
        html: &str,
        page_url: &str,
        candidate: &mut PropertyMap,
    ) -> Result<bool, AppError> {
        let document = Html::parse_document(html);
        let base = Url::parse(page_url).ok();
        let detail = resolve(
            document.root_element(),
            &self.detail_properties,
            base.as_ref(),
        )?;
        for (name, value) in detail {
            candidate.entry(name).or_insert(value);
        }

        Ok(self.content_filter.as_ref().is_none_or(|filter| {
            filter.is_match(candidate.get("contentText").map(String::as_str).unwrap_or(""))
        }))
    }
}

fn resolve(
    root: ElementRef<'_>,
    properties: &[CompiledProperty],
    base: Option<&Url>,
) -> Result<PropertyMap, AppError> {
    let mut values = PropertyMap::new();
    for property in properties {
        let target = match &property.selector {
            Some(selector) => root.select(selector).next(),
            None => Some(root),
        };
        let value = property.parser.apply(target, base).map_err(|reason| {
            AppError::ExtractionError(format!("property '{}': {reason}", property.name))
        })?;
        values.insert(property.name.clone(), value.trim().to_string());
    }
    Ok(values)
}

fn parse_selector(text: &str) -> Result<Selector, AppError> {
    Selector::parse(text)
        .map_err(|e| AppError::ConfigError(format!("invalid selector '{text}': {e}")))
}

fn parse_regex(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern)
        .map_err(|e| AppError::ConfigError(format!("invalid pattern '{pattern}': {e}")))
}
