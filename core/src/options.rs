//! Render requests and PDF export options.
//!
//! Caller-facing [`ExportOptions`] leave every field optional so that a
//! request only states what it wants to change. [`ExportOptions::resolve`]
//! merges them over the system defaults into a [`ResolvedExportOptions`]
//! with concrete values in inches, which is what engines consume.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RenderError, Result};

const PX_PER_INCH: f64 = 96.0;
const CM_PER_INCH: f64 = 2.54;
const MM_PER_INCH: f64 = 25.4;

/// A CSS length, stored in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length(f64);

impl Length {
    /// Length in inches.
    #[must_use]
    pub const fn inches(value: f64) -> Self {
        Self(value)
    }

    /// Length in CSS pixels (96 per inch).
    #[must_use]
    pub fn px(value: f64) -> Self {
        Self(value / PX_PER_INCH)
    }

    /// Length in centimetres.
    #[must_use]
    pub fn cm(value: f64) -> Self {
        Self(value / CM_PER_INCH)
    }

    /// Length in millimetres.
    #[must_use]
    pub fn mm(value: f64) -> Self {
        Self(value / MM_PER_INCH)
    }

    /// Value in inches.
    #[must_use]
    pub const fn as_inches(self) -> f64 {
        self.0
    }
}

impl FromStr for Length {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().to_ascii_lowercase();
        let split = trimmed
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| RenderError::InvalidRequest(format!("invalid length '{s}'")))?;
        if !value.is_finite() {
            return Err(RenderError::InvalidRequest(format!("invalid length '{s}'")));
        }
        match unit.trim() {
            "" | "px" => Ok(Self::px(value)),
            "in" => Ok(Self::inches(value)),
            "cm" => Ok(Self::cm(value)),
            "mm" => Ok(Self::mm(value)),
            other => Err(RenderError::InvalidRequest(format!(
                "unsupported length unit '{other}' in '{s}'"
            ))),
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}in", self.0)
    }
}

impl<'de> Deserialize<'de> for Length {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Px(f64),
            Css(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Px(value) => Ok(Self::px(value)),
            Repr::Css(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

impl Serialize for Length {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Paper dimensions in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperSize {
    /// Width in inches.
    pub width: f64,
    /// Height in inches.
    pub height: f64,
}

/// Named or custom page format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageFormat {
    /// 8.5in x 11in.
    Letter,
    /// 8.5in x 14in.
    Legal,
    /// 11in x 17in.
    Tabloid,
    /// 17in x 11in.
    Ledger,
    /// ISO A0.
    A0,
    /// ISO A1.
    A1,
    /// ISO A2.
    A2,
    /// ISO A3.
    A3,
    /// ISO A4.
    A4,
    /// ISO A5.
    A5,
    /// ISO A6.
    A6,
    /// Explicit width and height.
    Custom {
        /// Page width.
        width: Length,
        /// Page height.
        height: Length,
    },
}

impl PageFormat {
    /// Paper dimensions of this format.
    #[must_use]
    pub fn paper_size(self) -> PaperSize {
        let (width, height) = match self {
            Self::Letter => (8.5, 11.0),
            Self::Legal => (8.5, 14.0),
            Self::Tabloid => (11.0, 17.0),
            Self::Ledger => (17.0, 11.0),
            Self::A0 => (33.1, 46.8),
            Self::A1 => (23.4, 33.1),
            Self::A2 => (16.54, 23.4),
            Self::A3 => (11.7, 16.54),
            Self::A4 => (8.27, 11.7),
            Self::A5 => (5.83, 8.27),
            Self::A6 => (4.13, 5.83),
            Self::Custom { width, height } => (width.as_inches(), height.as_inches()),
        };
        PaperSize { width, height }
    }

    const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::Letter => "Letter",
            Self::Legal => "Legal",
            Self::Tabloid => "Tabloid",
            Self::Ledger => "Ledger",
            Self::A0 => "A0",
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::A3 => "A3",
            Self::A4 => "A4",
            Self::A5 => "A5",
            Self::A6 => "A6",
            Self::Custom { .. } => return None,
        })
    }
}

impl FromStr for PageFormat {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "letter" => Self::Letter,
            "legal" => Self::Legal,
            "tabloid" => Self::Tabloid,
            "ledger" => Self::Ledger,
            "a0" => Self::A0,
            "a1" => Self::A1,
            "a2" => Self::A2,
            "a3" => Self::A3,
            "a4" => Self::A4,
            "a5" => Self::A5,
            "a6" => Self::A6,
            other => {
                let Some((width, height)) = other.split_once('x') else {
                    return Err(RenderError::InvalidRequest(format!(
                        "unknown page format '{s}'"
                    )));
                };
                Self::Custom {
                    width: width.parse()?,
                    height: height.parse()?,
                }
            }
        })
    }
}

impl<'de> Deserialize<'de> for PageFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Named(String),
            Custom { width: Length, height: Length },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Named(name) => name.parse().map_err(de::Error::custom),
            Repr::Custom { width, height } => Ok(Self::Custom { width, height }),
        }
    }
}

impl Serialize for PageFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let Self::Custom { width, height } = self {
            let mut state = serializer.serialize_struct("PageFormat", 2)?;
            state.serialize_field("width", width)?;
            state.serialize_field("height", height)?;
            return state.end();
        }
        serializer.serialize_str(self.name().unwrap_or("A4"))
    }
}

/// Page margins; unset sides fall back to the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    /// Top margin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<Length>,
    /// Right margin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Length>,
    /// Bottom margin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<Length>,
    /// Left margin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Length>,
}

impl Margins {
    /// Same margin on every side.
    #[must_use]
    pub const fn uniform(length: Length) -> Self {
        Self {
            top: Some(length),
            right: Some(length),
            bottom: Some(length),
            left: Some(length),
        }
    }

    fn or(self, fallback: Self) -> Self {
        Self {
            top: self.top.or(fallback.top),
            right: self.right.or(fallback.right),
            bottom: self.bottom.or(fallback.bottom),
            left: self.left.or(fallback.left),
        }
    }
}

/// Caller-supplied PDF export options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// Page format, e.g. `"A4"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_format: Option<PageFormat>,
    /// Landscape orientation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landscape: Option<bool>,
    /// Print background graphics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_background: Option<bool>,
    /// Page margins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margins: Option<Margins>,
    /// Let CSS `@page` rules decide the page size.
    #[serde(
        default,
        alias = "preferContentDrivenPageSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub prefer_css_page_size: Option<bool>,
    /// Rendering scale, clamped to `0.1..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Page ranges such as `"1-3, 5"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
    /// HTML template for the page header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_template: Option<String>,
    /// HTML template for the page footer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer_template: Option<String>,
}

impl ExportOptions {
    /// Creates empty options (every field falls back to the defaults).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// System defaults: A4, background printing, minimal margins, CSS page size.
    #[must_use]
    pub fn system_defaults() -> Self {
        Self {
            page_format: Some(PageFormat::A4),
            landscape: Some(false),
            print_background: Some(true),
            margins: Some(Margins::uniform(Length::mm(10.0))),
            prefer_css_page_size: Some(true),
            scale: Some(1.0),
            page_ranges: None,
            header_template: None,
            footer_template: None,
        }
    }

    /// Sets the page format.
    #[must_use]
    pub const fn with_page_format(mut self, format: PageFormat) -> Self {
        self.page_format = Some(format);
        self
    }

    /// Sets landscape orientation.
    #[must_use]
    pub const fn with_landscape(mut self, landscape: bool) -> Self {
        self.landscape = Some(landscape);
        self
    }

    /// Sets background printing.
    #[must_use]
    pub const fn with_print_background(mut self, enabled: bool) -> Self {
        self.print_background = Some(enabled);
        self
    }

    /// Sets the margins.
    #[must_use]
    pub const fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = Some(margins);
        self
    }

    /// Sets whether CSS `@page` size wins over the page format.
    #[must_use]
    pub const fn with_prefer_css_page_size(mut self, prefer: bool) -> Self {
        self.prefer_css_page_size = Some(prefer);
        self
    }

    /// Sets the rendering scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Sets header and footer templates; either enables header/footer printing.
    #[must_use]
    pub fn with_header_footer(
        mut self,
        header: Option<String>,
        footer: Option<String>,
    ) -> Self {
        self.header_template = header;
        self.footer_template = footer;
        self
    }

    /// Field-wise merge: values set on `self` win over `base`.
    #[must_use]
    pub fn merged_over(&self, base: &Self) -> Self {
        let margins = match (self.margins, base.margins) {
            (Some(own), Some(base)) => Some(own.or(base)),
            (own, base) => own.or(base),
        };
        Self {
            page_format: self.page_format.or(base.page_format),
            landscape: self.landscape.or(base.landscape),
            print_background: self.print_background.or(base.print_background),
            margins,
            prefer_css_page_size: self.prefer_css_page_size.or(base.prefer_css_page_size),
            scale: self.scale.or(base.scale),
            page_ranges: self.page_ranges.clone().or_else(|| base.page_ranges.clone()),
            header_template: self
                .header_template
                .clone()
                .or_else(|| base.header_template.clone()),
            footer_template: self
                .footer_template
                .clone()
                .or_else(|| base.footer_template.clone()),
        }
    }

    /// Merges over [`ExportOptions::system_defaults`] and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidRequest`] for negative margins, a
    /// non-positive custom page size or a non-finite scale.
    pub fn resolve(&self) -> Result<ResolvedExportOptions> {
        let merged = self.merged_over(&Self::system_defaults());
        let paper = merged.page_format.unwrap_or(PageFormat::A4).paper_size();
        if !(paper.width > 0.0 && paper.height > 0.0) {
            return Err(RenderError::InvalidRequest(
                "page size must be positive".to_string(),
            ));
        }

        let margins = merged.margins.unwrap_or_default();
        let side = |length: Option<Length>| -> Result<f64> {
            let inches = length.map_or(0.0, Length::as_inches);
            if inches < 0.0 {
                return Err(RenderError::InvalidRequest(
                    "margins must not be negative".to_string(),
                ));
            }
            Ok(inches)
        };
        let margins = ResolvedMargins {
            top: side(margins.top)?,
            right: side(margins.right)?,
            bottom: side(margins.bottom)?,
            left: side(margins.left)?,
        };

        let scale = merged.scale.unwrap_or(1.0);
        if !scale.is_finite() {
            return Err(RenderError::InvalidRequest(
                "scale must be a finite number".to_string(),
            ));
        }

        let display_header_footer =
            merged.header_template.is_some() || merged.footer_template.is_some();
        Ok(ResolvedExportOptions {
            paper,
            landscape: merged.landscape.unwrap_or(false),
            print_background: merged.print_background.unwrap_or(true),
            margins,
            prefer_css_page_size: merged.prefer_css_page_size.unwrap_or(true),
            scale: scale.clamp(0.1, 2.0),
            page_ranges: merged.page_ranges.filter(|r| !r.trim().is_empty()),
            display_header_footer,
            header_template: merged.header_template,
            footer_template: merged.footer_template,
        })
    }
}

/// Margins in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMargins {
    /// Top margin.
    pub top: f64,
    /// Right margin.
    pub right: f64,
    /// Bottom margin.
    pub bottom: f64,
    /// Left margin.
    pub left: f64,
}

/// Export options with every value concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedExportOptions {
    /// Paper size in inches.
    pub paper: PaperSize,
    /// Landscape orientation.
    pub landscape: bool,
    /// Print background graphics.
    pub print_background: bool,
    /// Margins in inches.
    pub margins: ResolvedMargins,
    /// Let CSS `@page` rules decide the page size.
    pub prefer_css_page_size: bool,
    /// Rendering scale.
    pub scale: f64,
    /// Page ranges, if restricted.
    pub page_ranges: Option<String>,
    /// Whether header and footer templates are printed.
    pub display_header_footer: bool,
    /// Header template.
    pub header_template: Option<String>,
    /// Footer template.
    pub footer_template: Option<String>,
}

/// Content to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderSource {
    /// Inline HTML document.
    Html(String),
    /// Address to navigate to.
    Url(Url),
}

/// An immutable render request.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    source: RenderSource,
    options: ExportOptions,
}

impl RenderRequest {
    /// Request rendering an HTML string.
    #[must_use]
    pub fn html(html: impl Into<String>, options: ExportOptions) -> Self {
        Self {
            source: RenderSource::Html(html.into()),
            options,
        }
    }

    /// Request rendering the document at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidRequest`] if the URL does not parse or
    /// uses a scheme the renderer cannot load.
    pub fn url(url: &str, options: ExportOptions) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| RenderError::InvalidRequest(format!("invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https" | "file" | "data" | "about") {
            return Err(RenderError::InvalidRequest(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }
        Ok(Self {
            source: RenderSource::Url(parsed),
            options,
        })
    }

    /// What to render.
    #[must_use]
    pub const fn source(&self) -> &RenderSource {
        &self.source
    }

    /// Caller-supplied export options.
    #[must_use]
    pub const fn options(&self) -> &ExportOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn parses_css_lengths() {
        assert!(approx("96px".parse::<Length>().unwrap().as_inches(), 1.0));
        assert!(approx("25.4mm".parse::<Length>().unwrap().as_inches(), 1.0));
        assert!(approx("2.54cm".parse::<Length>().unwrap().as_inches(), 1.0));
        assert!(approx("0.5in".parse::<Length>().unwrap().as_inches(), 0.5));
        assert!(approx("48".parse::<Length>().unwrap().as_inches(), 0.5));
        assert!("10pt".parse::<Length>().is_err());
        assert!("wide".parse::<Length>().is_err());
    }

    #[test]
    fn page_format_is_case_insensitive() {
        assert_eq!("a4".parse::<PageFormat>().unwrap(), PageFormat::A4);
        assert_eq!("LETTER".parse::<PageFormat>().unwrap(), PageFormat::Letter);
        assert!("B5".parse::<PageFormat>().is_err());
    }

    #[test]
    fn page_format_accepts_width_by_height() {
        let format = "210mmx297mm".parse::<PageFormat>().unwrap();
        let size = format.paper_size();
        assert!(approx(size.width, 210.0 / 25.4));
        assert!(approx(size.height, 297.0 / 25.4));
        assert!(matches!("8.5inX11in".parse::<PageFormat>(), Ok(PageFormat::Custom { .. })));
        assert!("210mmx".parse::<PageFormat>().is_err());
        assert!("widextall".parse::<PageFormat>().is_err());
    }

    #[test]
    fn empty_options_resolve_to_system_defaults() {
        let resolved = ExportOptions::new().resolve().unwrap();
        assert_eq!(resolved.paper, PageFormat::A4.paper_size());
        assert!(resolved.print_background);
        assert!(resolved.prefer_css_page_size);
        assert!(!resolved.landscape);
        assert!(approx(resolved.margins.top, 10.0 / 25.4));
        assert!(!resolved.display_header_footer);
    }

    #[test]
    fn caller_options_override_defaults_per_field() {
        let options = ExportOptions::new()
            .with_page_format(PageFormat::Letter)
            .with_landscape(true)
            .with_margins(Margins {
                top: Some(Length::inches(1.0)),
                ..Margins::default()
            });
        let resolved = options.resolve().unwrap();
        assert_eq!(resolved.paper, PageFormat::Letter.paper_size());
        assert!(resolved.landscape);
        assert!(resolved.print_background);
        assert!(approx(resolved.margins.top, 1.0));
        assert!(approx(resolved.margins.left, 10.0 / 25.4));
    }

    #[test]
    fn rejects_negative_margins() {
        let options = ExportOptions::new().with_margins(Margins::uniform(Length::mm(-1.0)));
        assert!(matches!(
            options.resolve(),
            Err(RenderError::InvalidRequest(_))
        ));
    }

    #[test]
    fn clamps_scale() {
        let resolved = ExportOptions::new().with_scale(5.0).resolve().unwrap();
        assert!(approx(resolved.scale, 2.0));
    }

    #[test]
    fn header_template_enables_header_footer() {
        let resolved = ExportOptions::new()
            .with_header_footer(Some("<span class=title></span>".into()), None)
            .resolve()
            .unwrap();
        assert!(resolved.display_header_footer);
    }

    #[test]
    fn deserializes_boundary_shape() {
        let options: ExportOptions = serde_json::from_str(
            r#"{
                "pageFormat": "A4",
                "landscape": true,
                "printBackground": false,
                "margins": {"top": "1cm", "left": 24},
                "preferCssPageSize": false
            }"#,
        )
        .unwrap();
        assert_eq!(options.page_format, Some(PageFormat::A4));
        assert_eq!(options.landscape, Some(true));
        assert_eq!(options.print_background, Some(false));
        let margins = options.margins.unwrap();
        assert!(approx(margins.top.unwrap().as_inches(), 1.0 / 2.54));
        assert!(approx(margins.left.unwrap().as_inches(), 0.25));
        assert!(margins.right.is_none());
    }

    #[test]
    fn content_driven_page_size_is_an_alias() {
        let options: ExportOptions =
            serde_json::from_str(r#"{"preferContentDrivenPageSize": false}"#).unwrap();
        assert_eq!(options.prefer_css_page_size, Some(false));
        assert!(!options.resolve().unwrap().prefer_css_page_size);
    }

    #[test]
    fn custom_page_format_deserializes() {
        let options: ExportOptions =
            serde_json::from_str(r#"{"pageFormat": {"width": "100mm", "height": "150mm"}}"#)
                .unwrap();
        let size = options.page_format.unwrap().paper_size();
        assert!(approx(size.width, 100.0 / 25.4));
        assert!(approx(size.height, 150.0 / 25.4));
    }

    #[test]
    fn url_requests_validate_scheme() {
        assert!(RenderRequest::url("https://example.com/report", ExportOptions::new()).is_ok());
        assert!(RenderRequest::url("ftp://example.com/file", ExportOptions::new()).is_err());
        assert!(RenderRequest::url("not a url", ExportOptions::new()).is_err());
    }
}
