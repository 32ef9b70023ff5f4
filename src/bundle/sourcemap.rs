//! Source Map v3.
//!
//! Mappings are kept decoded while the bundle is assembled, one `Vec` of
//! segments per generated line, and only encoded to base64 VLQ when the map
//! is written out.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::SourceMapError;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const INLINE_PREFIX: &str = "//# sourceMappingURL=data:application/json;base64,";

/// The JSON form of a source map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources_content: Vec<Option<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

/// Position in an original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub source: u32,
    pub line: u32,
    pub column: u32,
    pub name: Option<u32>,
}

/// One mapping segment, starting at `column` of the generated line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub column: u32,
    pub origin: Option<Origin>,
}

pub type Lines = Vec<Vec<Segment>>;

impl SourceMap {
    pub fn from_json(json: &str) -> Result<Self, SourceMapError> {
        let map: SourceMap = serde_json::from_str(json)?;
        if map.version != 3 {
            return Err(SourceMapError::Version(map.version));
        }
        Ok(map)
    }

    pub fn to_json(&self) -> Result<String, SourceMapError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decoded mappings.
    pub fn lines(&self) -> Result<Lines, SourceMapError> {
        decode_mappings(&self.mappings)
    }

    /// Full source path, including `sourceRoot` when there is one.
    pub fn source(&self, index: u32) -> Option<String> {
        let source = self.sources.get(index as usize)?;
        Some(match self.source_root.as_deref() {
            Some(root) if !root.is_empty() => format!("{}/{}", root.trim_end_matches('/'), source),
            _ => source.clone(),
        })
    }

    pub fn content(&self, index: u32) -> Option<&str> {
        self.sources_content
            .get(index as usize)
            .and_then(Option::as_deref)
    }

    /// Maps positions of `self`, which point into the generated output of
    /// `inner`, further back to the sources of `inner`.
    ///
    /// Segments that land on an unmapped part of `inner` lose their origin.
    pub fn compose(&self, inner: &SourceMap) -> Result<SourceMap, SourceMapError> {
        let outer_lines = self.lines()?;
        let inner_lines = inner.lines()?;

        let mut builder = SourceMapBuilder::new();
        let sources: Vec<u32> = (0..inner.sources.len() as u32)
            .map(|i| {
                let name = inner.source(i).unwrap_or_default();
                builder.add_source(&name, inner.content(i))
            })
            .collect();

        for line in outer_lines {
            let mut out = Vec::with_capacity(line.len());

            for segment in line {
                let hit = segment
                    .origin
                    .and_then(|o| lookup(&inner_lines, o.line, o.column).map(|hit| (o, hit)));

                let origin = match hit {
                    Some((outer, hit)) => {
                        let source = sources
                            .get(hit.source as usize)
                            .copied()
                            .ok_or(SourceMapError::SourceIndex(hit.source))?;
                        let name = outer
                            .name
                            .and_then(|n| self.names.get(n as usize))
                            .or_else(|| hit.name.and_then(|n| inner.names.get(n as usize)))
                            .map(|n| builder.add_name(n));

                        Some(Origin {
                            source,
                            line: hit.line,
                            column: hit.column,
                            name,
                        })
                    }
                    None => None,
                };

                out.push(Segment {
                    column: segment.column,
                    origin,
                });
            }

            builder.push_line(out);
        }

        Ok(builder.build(self.file.clone()))
    }
}

/// Finds the origin of a generated position: the last segment on that line
/// starting at or before `column`.
pub fn lookup(lines: &Lines, line: u32, column: u32) -> Option<Origin> {
    let segments = lines.get(line as usize)?;
    let at = segments.partition_point(|s| s.column <= column);
    segments[..at].last().and_then(|s| s.origin)
}

/// Accumulates sources, names and decoded lines for a new map.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    contents: Vec<Option<String>>,
    names: Vec<String>,
    lines: Lines,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source, returning its index. Sources are deduplicated by
    /// path, the first content seen wins.
    pub fn add_source(&mut self, path: &str, content: Option<&str>) -> u32 {
        if let Some(index) = self.sources.iter().position(|s| s == path) {
            if self.contents[index].is_none() {
                self.contents[index] = content.map(str::to_string);
            }
            return index as u32;
        }
        self.sources.push(path.to_string());
        self.contents.push(content.map(str::to_string));
        (self.sources.len() - 1) as u32
    }

    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(index) = self.names.iter().position(|n| n == name) {
            return index as u32;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as u32
    }

    pub fn push_line(&mut self, segments: Vec<Segment>) {
        self.lines.push(segments);
    }

    /// Pushes `count` lines that map to nothing.
    pub fn push_blank(&mut self, count: usize) {
        self.lines.extend(std::iter::repeat_with(Vec::new).take(count));
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn build(self, file: Option<String>) -> SourceMap {
        let has_content = self.contents.iter().any(Option::is_some);
        SourceMap {
            version: 3,
            file,
            source_root: None,
            mappings: encode_mappings(&self.lines),
            sources: self.sources,
            sources_content: if has_content { self.contents } else { Vec::new() },
            names: self.names,
        }
    }
}

/// Splits a trailing inline `sourceMappingURL` comment off generated code.
pub fn split_inline(code: &str) -> Result<(&str, Option<SourceMap>), SourceMapError> {
    let trimmed = code.trim_end();
    let Some(at) = trimmed.rfind(INLINE_PREFIX) else {
        return Ok((code, None));
    };

    let payload = trimmed[at + INLINE_PREFIX.len()..].trim();
    let json = STANDARD.decode(payload)?;
    let map = SourceMap::from_json(&String::from_utf8_lossy(&json))?;

    Ok((&code[..at], Some(map)))
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };

    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn decode_digit(c: u8) -> Result<i64, SourceMapError> {
    BASE64
        .iter()
        .position(|&b| b == c)
        .map(|p| p as i64)
        .ok_or(SourceMapError::InvalidBase64(c as char))
}

pub fn encode_mappings(lines: &Lines) -> String {
    let mut out = String::new();
    let (mut source, mut line, mut column, mut name) = (0i64, 0i64, 0i64, 0i64);

    for (i, segments) in lines.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }

        let mut generated = 0i64;
        for (j, segment) in segments.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }

            encode_vlq(&mut out, segment.column as i64 - generated);
            generated = segment.column as i64;

            if let Some(origin) = segment.origin {
                encode_vlq(&mut out, origin.source as i64 - source);
                encode_vlq(&mut out, origin.line as i64 - line);
                encode_vlq(&mut out, origin.column as i64 - column);
                source = origin.source as i64;
                line = origin.line as i64;
                column = origin.column as i64;

                if let Some(n) = origin.name {
                    encode_vlq(&mut out, n as i64 - name);
                    name = n as i64;
                }
            }
        }
    }

    out
}

/// Mapping fields are 32-bit, so no value needs more than seven digits.
const MAX_SHIFT: u32 = 30;

fn field(value: i64) -> Result<u32, SourceMapError> {
    u32::try_from(value).map_err(|_| SourceMapError::OutOfRange(value))
}

pub fn decode_mappings(mappings: &str) -> Result<Lines, SourceMapError> {
    let mut lines = Vec::new();
    let (mut source, mut line, mut column, mut name) = (0i64, 0i64, 0i64, 0i64);

    for text in mappings.split(';') {
        let mut segments = Vec::new();
        let mut generated = 0i64;

        for chunk in text.split(',').filter(|chunk| !chunk.is_empty()) {
            let mut fields = [0i64; 5];
            let mut count = 0;
            let mut value = 0i64;
            let mut shift = 0u32;

            for &byte in chunk.as_bytes() {
                let digit = decode_digit(byte)?;
                value += (digit & 0b11111) << shift;
                if digit & 0b100000 != 0 {
                    shift += 5;
                    if shift > MAX_SHIFT {
                        return Err(SourceMapError::VlqOverflow);
                    }
                    continue;
                }
                if count == fields.len() {
                    return Err(SourceMapError::InvalidSegment(count + 1));
                }
                let negative = value & 1 == 1;
                value >>= 1;
                fields[count] = if negative { -value } else { value };
                count += 1;
                value = 0;
                shift = 0;
            }

            if shift != 0 {
                return Err(SourceMapError::TruncatedVlq);
            }

            generated += fields[0];
            let origin = match count {
                1 => None,
                4 | 5 => {
                    source += fields[1];
                    line += fields[2];
                    column += fields[3];
                    let origin_name = if count == 5 {
                        name += fields[4];
                        Some(field(name)?)
                    } else {
                        None
                    };
                    Some(Origin {
                        source: field(source)?,
                        line: field(line)?,
                        column: field(column)?,
                        name: origin_name,
                    })
                }
                n => return Err(SourceMapError::InvalidSegment(n)),
            };

            segments.push(Segment {
                column: field(generated)?,
                origin,
            });
        }

        lines.push(segments);
    }

    Ok(lines)
}
