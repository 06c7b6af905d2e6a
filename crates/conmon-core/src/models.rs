use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::mapper::{Entity, FieldDescriptor, FieldKind, FieldSet, FieldValue, type_mismatch};

/// Property values extracted for one candidate, keyed by property name.
pub type PropertyMap = BTreeMap<String, String>;

/// A monitored web source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Source {
    pub id: String,
    /// Serialized [`ExtractionConfig`].
    pub config: String,
    /// Url of the most recently confirmed item, if any.
    pub watermark_url: Option<String>,
    pub enabled: bool,
}

impl Source {
    pub fn new(id: impl Into<String>, config: &ExtractionConfig) -> Result<Self, AppError> {
        Ok(Self {
            id: id.into(),
            config: serde_json::to_string(config)?,
            watermark_url: None,
            enabled: true,
        })
    }

    /// Parse the stored config and inject the current watermark.
    pub fn launch_config(&self) -> Result<ExtractionConfig, AppError> {
        let mut config: ExtractionConfig = serde_json::from_str(&self.config).map_err(|e| {
            AppError::ConfigError(format!("source '{}' has an invalid config: {e}", self.id))
        })?;
        config.watermark = self.watermark_url.clone();
        Ok(config)
    }
}

impl Entity for Source {
    const TABLE: &'static str = "sources";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::new("id", FieldKind::Text),
        FieldDescriptor::new("config", FieldKind::Text),
        FieldDescriptor::new("watermark_url", FieldKind::Text),
        FieldDescriptor::new("enabled", FieldKind::Bool),
    ];

    fn to_fields(&self) -> FieldSet {
        FieldSet::new()
            .with("id", self.id.as_str())
            .with("config", self.config.as_str())
            .with(
                "watermark_url",
                FieldValue::text_opt(self.watermark_url.as_deref()),
            )
            .with("enabled", self.enabled)
    }

    fn assign(&mut self, column: &str, value: FieldValue) -> Result<(), AppError> {
        match (column, value) {
            ("id", FieldValue::Text(v)) => self.id = v,
            ("config", FieldValue::Text(v)) => self.config = v,
            ("watermark_url", FieldValue::Text(v)) => self.watermark_url = Some(v),
            ("enabled", FieldValue::Bool(v)) => self.enabled = v,
            (column, value) => return Err(type_mismatch(Self::TABLE, column, &value)),
        }
        Ok(())
    }
}

/// Where a property is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertySource {
    /// The listing element matched by the item selector.
    Item,
    /// The candidate's detail document.
    Detail,
}

/// How a value is read from the (narrowed) root element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Parser {
    /// Concatenated descendant text.
    #[default]
    Text,
    /// Inner HTML.
    Html,
    /// Raw attribute value.
    Attr { name: String },
    /// Attribute resolved to an absolute URL against the page URL.
    Link { attr: String },
    /// Data of the `index`-th child node, which must be a text node.
    ChildText { index: usize },
    /// A named callback from the parser registry.
    Callback { name: String },
}

impl fmt::Display for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parser::Text => write!(f, "text"),
            Parser::Html => write!(f, "html"),
            Parser::Attr { name } => write!(f, "attr:{name}"),
            Parser::Link { attr } => write!(f, "link:{attr}"),
            Parser::ChildText { index } => write!(f, "child_text:{index}"),
            Parser::Callback { name } => write!(f, "callback:{name}"),
        }
    }
}

impl FromStr for Parser {
    type Err = AppError;

    /// Parse the shorthand forms, including the jQuery-style suffixes used by
    /// older configs (`.text()`, `.html()`, `[0].href`, `.attr('title')`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("function") {
            return Err(AppError::ConfigError(
                "inline script parsers are not supported; register a named callback".into(),
            ));
        }

        match s {
            "" | "text" | ".text()" => return Ok(Parser::Text),
            "html" | ".html()" => return Ok(Parser::Html),
            _ => {}
        }

        if let Some(attr) = s.strip_prefix("[0].") {
            return Ok(Parser::Link {
                attr: attr.to_string(),
            });
        }
        if let Some(name) = s
            .strip_prefix(".attr(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let name = name.trim_matches(|c| c == '\'' || c == '"');
            return Ok(Parser::Attr {
                name: name.to_string(),
            });
        }

        let (kind, arg) = s
            .split_once(':')
            .ok_or_else(|| AppError::ConfigError(format!("unknown parser '{s}'")))?;
        if arg.is_empty() {
            return Err(AppError::ConfigError(format!("parser '{s}' needs an argument")));
        }
        match kind {
            "attr" => Ok(Parser::Attr { name: arg.into() }),
            "link" => Ok(Parser::Link { attr: arg.into() }),
            "child_text" => arg
                .parse()
                .map(|index| Parser::ChildText { index })
                .map_err(|_| AppError::ConfigError(format!("invalid child index in '{s}'"))),
            "callback" => Ok(Parser::Callback { name: arg.into() }),
            _ => Err(AppError::ConfigError(format!("unknown parser '{s}'"))),
        }
    }
}

/// A parser as written in a config: shorthand string or tagged object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParserSpec {
    Shorthand(String),
    Typed(Parser),
}

/// Definition of one named property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub source: PropertySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<ParserSpec>,
}

impl PropertyDef {
    /// Resolve the configured parser, defaulting to plain text.
    pub fn parser(&self) -> Result<Parser, AppError> {
        match &self.parser {
            None => Ok(Parser::Text),
            Some(ParserSpec::Typed(parser)) => Ok(parser.clone()),
            Some(ParserSpec::Shorthand(text)) => text.parse(),
        }
    }
}

/// Declarative description of how to crawl one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionConfig {
    pub start_page: String,
    pub item_selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_pattern: Option<String>,
    pub properties: BTreeMap<String, PropertyDef>,
    /// Url where the list scan stops. Injected at launch time.
    #[serde(default, rename = "latestUrl")]
    pub watermark: Option<String>,
}

/// A persisted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    pub id: Uuid,
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub pub_time: Option<DateTime<Utc>>,
    pub content: String,
    pub content_text: String,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Build a record from one engine output line.
    ///
    /// The line must be a JSON object with a non-empty `url`; a non-empty
    /// `pubTime` must be parseable.
    pub fn from_line(source_id: &str, line: &str) -> Result<Self, AppError> {
        let emitted: EmittedRecord = serde_json::from_str(line)
            .map_err(|e| AppError::EngineError(format!("malformed record line: {e}")))?;
        if emitted.url.trim().is_empty() {
            return Err(AppError::EngineError("record line has an empty url".into()));
        }
        let pub_time = match emitted.pub_time.as_deref() {
            Some(raw) => parse_pub_time(raw)?,
            None => None,
        };

        Ok(Self {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            url: emitted.url,
            title: emitted.title,
            pub_time,
            content: emitted.content,
            content_text: emitted.content_text,
            created_at: Utc::now(),
        })
    }
}

impl Entity for Record {
    const TABLE: &'static str = "records";
    const FIELDS: &'static [FieldDescriptor] = &[
        FieldDescriptor::new("id", FieldKind::Uuid),
        FieldDescriptor::new("source_id", FieldKind::Text),
        FieldDescriptor::new("url", FieldKind::Text),
        FieldDescriptor::new("title", FieldKind::Text),
        FieldDescriptor::new("pub_time", FieldKind::Timestamp),
        FieldDescriptor::new("content", FieldKind::Text),
        FieldDescriptor::new("content_text", FieldKind::Text),
        FieldDescriptor::new("created_at", FieldKind::Timestamp),
    ];

    fn to_fields(&self) -> FieldSet {
        FieldSet::new()
            .with("id", self.id)
            .with("source_id", self.source_id.as_str())
            .with("url", self.url.as_str())
            .with("title", self.title.as_str())
            .with("pub_time", FieldValue::timestamp_opt(self.pub_time))
            .with("content", self.content.as_str())
            .with("content_text", self.content_text.as_str())
            .with("created_at", self.created_at)
    }

    fn assign(&mut self, column: &str, value: FieldValue) -> Result<(), AppError> {
        match (column, value) {
            ("id", FieldValue::Uuid(v)) => self.id = v,
            ("source_id", FieldValue::Text(v)) => self.source_id = v,
            ("url", FieldValue::Text(v)) => self.url = v,
            ("title", FieldValue::Text(v)) => self.title = v,
            ("pub_time", FieldValue::Timestamp(v)) => self.pub_time = Some(v),
            ("content", FieldValue::Text(v)) => self.content = v,
            ("content_text", FieldValue::Text(v)) => self.content_text = v,
            ("created_at", FieldValue::Timestamp(v)) => self.created_at = v,
            (column, value) => return Err(type_mismatch(Self::TABLE, column, &value)),
        }
        Ok(())
    }
}

/// Wire shape of one engine output line. Extra properties are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmittedRecord {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    pub_time: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    content_text: String,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// Parse a listing's publish time. Naive values are taken as UTC.
pub fn parse_pub_time(raw: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    let text = raw
        .trim()
        .trim_matches(|c| matches!(c, '[' | ']' | '(' | ')'))
        .trim();
    if text.is_empty() {
        return Ok(None);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Some(dt.and_utc()));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()));
        }
    }

    Err(AppError::EngineError(format!(
        "unrecognised publish time '{raw}'"
    )))
}
