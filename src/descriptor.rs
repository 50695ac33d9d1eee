use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

/// Transport tag for bridge lines that name no pluggable transport
pub const DEFAULT_TRANSPORT: &str = "vanilla";

const WARNING_PREVIEW_CHARS: usize = 50;

/// torrc directives that mark a text as a configuration file rather than a bridge list
const CONFIG_DIRECTIVES: [&str; 5] = [
    "usebridges",
    "clienttransportplugin",
    "socksport",
    "datadirectory",
    "log",
];

lazy_static! {
    static ref ADDRESS_TOKEN: Regex =
        Regex::new(r"^(?:\[(?P<v6>[^\]]*)\]|(?P<host>[A-Za-z0-9.\-]+)):(?P<port>\d+)$").unwrap();
    static ref HEX_TOKEN: Regex = Regex::new(r"^[0-9A-Fa-f]+$").unwrap();
    static ref EMBEDDED_BRIDGE: Regex = Regex::new(
        r"\b(?:Bridge[ \t]+)?(?P<transport>[A-Za-z][A-Za-z0-9_]*)[ \t]+(?P<address>\S+:\d+)[ \t]+(?P<fingerprint>[0-9A-F]+)[ \t]+cert=(?P<cert>\S+)[ \t]+iat-mode=(?P<iat>\d)"
    )
    .unwrap();
}

/// One bridge line, as read from the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeDescriptor {
    /// Position in the parsed sequence; output order is restored from it
    pub index: usize,
    pub raw_line: String,
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub fingerprint: Option<String>,
    pub cert: Option<String>,
    /// Remaining `key=value` arguments, in input order
    pub params: Vec<(String, String)>,
    pub source_line: usize,
}

impl BridgeDescriptor {
    /// `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The descriptor as a torrc `Bridge` directive
    pub fn bridge_directive(&self) -> String {
        let starts_with_keyword = self
            .raw_line
            .split_whitespace()
            .next()
            .map(|token| token.eq_ignore_ascii_case("bridge"))
            .unwrap_or(false);

        if starts_with_keyword {
            self.raw_line.clone()
        } else {
            format!("Bridge {}", self.raw_line)
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for BridgeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.transport, self.address())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Line carries an `address:port` token that is not a valid endpoint
    MalformedAddress,
    /// Line carries no `address:port` token at all
    Unrecognised,
    /// `Bridge` directive with a valid address but missing fingerprint, `cert=` or `iat-mode=`
    Incomplete,
}

/// A skipped input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub line: usize,
    pub kind: WarningKind,
    /// Line content truncated for display
    pub content: String,
}

impl ParseWarning {
    fn new(line: usize, kind: WarningKind, text: &str) -> Self {
        Self {
            line,
            kind,
            content: truncate(text, WARNING_PREVIEW_CHARS),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::MalformedAddress => {
                write!(f, "line {}: malformed address in `{}`", self.line, self.content)
            }
            WarningKind::Unrecognised => {
                write!(f, "line {}: unrecognised line `{}`", self.line, self.content)
            }
            WarningKind::Incomplete => {
                write!(f, "line {}: incomplete bridge directive `{}`", self.line, self.content)
            }
        }
    }
}

/// Layout of the input text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum InputShape {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    /// One bridge per line
    #[serde(rename = "lines")]
    LineList,
    /// Bridge directives inside a torrc
    #[serde(rename = "torrc")]
    EmbeddedConfig,
}

impl FromStr for InputShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(InputShape::Auto),
            "lines" | "list" => Ok(InputShape::LineList),
            "torrc" | "config" => Ok(InputShape::EmbeddedConfig),
            other => Err(format!("unknown input shape `{other}` (expected auto, lines or torrc)")),
        }
    }
}

/// Parser output: descriptors in input order plus skipped lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBridges {
    pub descriptors: Vec<BridgeDescriptor>,
    pub warnings: Vec<ParseWarning>,
    pub shape: InputShape,
}

impl ParsedBridges {
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

pub fn parse(text: &str) -> ParsedBridges {
    parse_with_shape(text, InputShape::Auto)
}

pub fn parse_with_shape(text: &str, shape: InputShape) -> ParsedBridges {
    let shape = match shape {
        InputShape::Auto => detect_shape(text),
        explicit => explicit,
    };

    let mut parsed = ParsedBridges {
        shape,
        ..ParsedBridges::default()
    };

    for (offset, line) in text.lines().enumerate() {
        let line_no = offset + 1;
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match shape {
            InputShape::EmbeddedConfig => parse_config_line(line, line_no, &mut parsed),
            _ => parse_list_line(line, line_no, &mut parsed),
        }
    }

    parsed
}

fn detect_shape(text: &str) -> InputShape {
    let has_directive = text
        .lines()
        .filter_map(|line| line.trim().split_whitespace().next())
        .any(|first| {
            let first = first.to_ascii_lowercase();
            CONFIG_DIRECTIVES.contains(&first.as_str())
        });

    if has_directive {
        InputShape::EmbeddedConfig
    } else {
        InputShape::LineList
    }
}

fn parse_list_line(line: &str, line_no: usize, parsed: &mut ParsedBridges) {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens
        .first()
        .map(|t| t.eq_ignore_ascii_case("bridge"))
        .unwrap_or(false)
    {
        tokens.remove(0);
    }

    let Some(position) = tokens.iter().position(|t| ADDRESS_TOKEN.is_match(t)) else {
        parsed
            .warnings
            .push(ParseWarning::new(line_no, WarningKind::Unrecognised, line));
        return;
    };

    let Some((host, port)) = split_address(tokens[position]) else {
        parsed
            .warnings
            .push(ParseWarning::new(line_no, WarningKind::MalformedAddress, line));
        return;
    };

    let transport = if position > 0 {
        tokens[0].to_string()
    } else {
        DEFAULT_TRANSPORT.to_string()
    };

    let mut rest = tokens[position + 1..].iter().peekable();
    let fingerprint = rest
        .next_if(|t| HEX_TOKEN.is_match(t))
        .map(|t| t.to_string());

    let mut cert = None;
    let mut params = Vec::new();
    for token in rest {
        match token.split_once('=') {
            Some(("cert", value)) => cert = Some(value.to_string()),
            Some((key, value)) => params.push((key.to_string(), value.to_string())),
            None => {}
        }
    }

    let index = parsed.descriptors.len();
    parsed.descriptors.push(BridgeDescriptor {
        index,
        raw_line: line.to_string(),
        transport,
        host,
        port,
        fingerprint,
        cert,
        params,
        source_line: line_no,
    });
}

fn parse_config_line(line: &str, line_no: usize, parsed: &mut ParsedBridges) {
    let mut matched = false;

    for caps in EMBEDDED_BRIDGE.captures_iter(line) {
        matched = true;
        let Some((host, port)) = split_address(&caps["address"]) else {
            parsed
                .warnings
                .push(ParseWarning::new(line_no, WarningKind::MalformedAddress, line));
            continue;
        };

        let transport = &caps["transport"];
        let transport = if transport.eq_ignore_ascii_case("bridge") {
            DEFAULT_TRANSPORT
        } else {
            transport
        };

        let index = parsed.descriptors.len();
        parsed.descriptors.push(BridgeDescriptor {
            index,
            raw_line: caps[0].trim().to_string(),
            transport: transport.to_string(),
            host,
            port,
            fingerprint: Some(caps["fingerprint"].to_string()),
            cert: Some(caps["cert"].to_string()),
            params: vec![("iat-mode".to_string(), caps["iat"].to_string())],
            source_line: line_no,
        });
    }

    // Other directives are expected in a torrc; only a Bridge line that failed to match is suspicious
    let is_bridge_directive = line
        .split_whitespace()
        .next()
        .map(|t| t.eq_ignore_ascii_case("bridge"))
        .unwrap_or(false);
    if !matched && is_bridge_directive {
        let kind = match line.split_whitespace().find(|t| ADDRESS_TOKEN.is_match(t)) {
            Some(token) if split_address(token).is_some() => WarningKind::Incomplete,
            Some(_) => WarningKind::MalformedAddress,
            None => WarningKind::Unrecognised,
        };
        parsed.warnings.push(ParseWarning::new(line_no, kind, line));
    }
}

/// Splits an `address:port` token into a validated host and port
fn split_address(token: &str) -> Option<(String, u16)> {
    let caps = ADDRESS_TOKEN.captures(token)?;

    let host = if let Some(v6) = caps.name("v6") {
        v6.as_str().parse::<Ipv6Addr>().ok()?;
        v6.as_str().to_string()
    } else {
        let host = caps.name("host")?.as_str();
        if host.chars().all(|c| c.is_ascii_digit() || c == '.') {
            host.parse::<Ipv4Addr>().ok()?;
        } else if host.split('.').any(|label| label.is_empty() || label.starts_with('-')) {
            return None;
        }
        host.to_string()
    };

    let port = caps["port"].parse::<u16>().ok().filter(|p| *p != 0)?;
    Some((host, port))
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
