//! Section snapshot text format.
//!
//! A snapshot is a flat text tree. A literal is wrapped in braces and a
//! composite is a run of `identifier{value}` pairs:
//!
//! ```text
//! structures{}chunks{0,0,0{block_palette{Air,Stone}block_data{0,1,1,0}block_states{1,0,0{health{4.5}}}}}
//! ```
//!
//! Decoding works bottom-up. Each pass replaces every innermost `{...}`
//! group with a numbered back-reference `<N>`; a group whose text holds
//! back-references is a composite, anything else is a leaf typed by
//! [`classify_leaf`]. The text left once no group remains is the root.
//!
//! Leaf typing is heuristic, so the schema layer coerces the two values it
//! can confuse: a one-entry palette reads back as text and a one-voxel grid
//! as a number. The encoder refuses names that would read back as anything
//! other than themselves.

use std::collections::BTreeMap;

use quarry_common::{ChunkPos, Grid, LocalPos, SpatialPos, WorldError, WorldResult};

use crate::chunk::{BlockState, Chunk};
use crate::section::{Section, Structure};

/// Maximum nesting depth the decoder unwinds.
pub const MAX_DEPTH: usize = 256;

const RESERVED: [char; 5] = ['{', '}', '<', '>', ','];

/// A decoded tree value.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Composite, or the empty literal `{}`
    Map(Vec<(String, Node)>),
    /// Two or more comma-separated integers, each at most 255
    Bytes(Vec<u8>),
    /// Any other comma-separated text
    List(Vec<String>),
    /// A finite number
    Number(f64),
    /// Anything else
    Text(String),
}

impl Node {
    /// Value stored under `key`, for composites.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Map(_) => "map",
            Self::Bytes(_) => "byte array",
            Self::List(_) => "list",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }

    fn into_fields(self, context: &str) -> WorldResult<BTreeMap<String, Node>> {
        let Self::Map(entries) = self else {
            return Err(WorldError::malformed(format!(
                "{context}: expected a map, found a {}",
                self.kind()
            )));
        };
        let mut fields = BTreeMap::new();
        for (key, value) in entries {
            if fields.contains_key(&key) {
                return Err(WorldError::malformed(format!("{context}: duplicate key '{key}'")));
            }
            fields.insert(key, value);
        }
        Ok(fields)
    }
}

/// Types the raw text of a leaf group. Checks run in a fixed order: byte
/// array, list, number, empty map, text.
#[must_use]
pub fn classify_leaf(text: &str) -> Node {
    if let Some(bytes) = parse_byte_array(text) {
        return Node::Bytes(bytes);
    }
    if text.contains(',') {
        return Node::List(text.split(',').map(str::to_string).collect());
    }
    if let Some(number) = parse_number(text) {
        return Node::Number(number);
    }
    if text.is_empty() {
        return Node::Map(Vec::new());
    }
    Node::Text(text.to_string())
}

// Whole-text match: every element must be a decimal byte, so `1,2x` is a
// list rather than a byte array with trailing junk.
fn parse_byte_array(text: &str) -> Option<Vec<u8>> {
    if !text.contains(',') {
        return None;
    }
    text.split(',')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse::<u8>().ok()
        })
        .collect()
}

fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parses snapshot text into its root composite.
pub fn parse_tree(text: &str) -> WorldResult<Node> {
    let mut slots: Vec<Option<Node>> = Vec::new();
    let mut current = text.to_string();
    for _ in 0..=MAX_DEPTH {
        let (next, replaced) = collapse_innermost(&current, &mut slots)?;
        if replaced == 0 {
            if current.contains(['{', '}']) {
                return Err(WorldError::malformed("unbalanced braces"));
            }
            let root = parse_composite(&current, &mut slots)?;
            if let Some(id) = slots.iter().position(Option::is_some) {
                return Err(WorldError::malformed(format!("value <{id}> is never referenced")));
            }
            return Ok(root);
        }
        current = next;
    }
    Err(WorldError::malformed(format!("nesting deeper than {MAX_DEPTH}")))
}

/// Replaces every innermost group with a back-reference to its parsed value.
fn collapse_innermost(text: &str, slots: &mut Vec<Option<Node>>) -> WorldResult<(String, usize)> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut open = None;
    let mut replaced = 0;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => open = Some(i),
            '}' => {
                if let Some(start) = open.take() {
                    out.push_str(&text[last..start]);
                    let inner = &text[start + 1..i];
                    let node = if inner.contains('<') {
                        parse_composite(inner, slots)?
                    } else {
                        classify_leaf(inner)
                    };
                    slots.push(Some(node));
                    out.push('<');
                    out.push_str(&(slots.len() - 1).to_string());
                    out.push('>');
                    last = i + 1;
                    replaced += 1;
                }
            },
            _ => {},
        }
    }
    out.push_str(&text[last..]);
    Ok((out, replaced))
}

/// Resolves `identifier<N>` pairs against earlier values.
fn parse_composite(text: &str, slots: &mut [Option<Node>]) -> WorldResult<Node> {
    let mut entries = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let open = rest
            .find('<')
            .ok_or_else(|| WorldError::malformed(format!("trailing text '{rest}'")))?;
        let identifier = &rest[..open];
        if identifier.is_empty() || identifier.contains('>') {
            return Err(WorldError::malformed(format!("bad identifier before '{}'", &rest[open..])));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('>')
            .ok_or_else(|| WorldError::malformed("unterminated back-reference"))?;
        let id: usize = after[..close]
            .parse()
            .map_err(|_| WorldError::malformed(format!("bad back-reference <{}>", &after[..close])))?;
        let value = slots
            .get_mut(id)
            .and_then(Option::take)
            .ok_or_else(|| WorldError::malformed(format!("dangling back-reference <{id}>")))?;
        entries.push((identifier.to_string(), value));
        rest = &after[close + 1..];
    }
    Ok(Node::Map(entries))
}

/// Returns true if a name reads back as itself inside a palette.
#[must_use]
pub fn is_codec_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(RESERVED) && name.parse::<f64>().is_err()
}

fn check_name(name: &str) -> WorldResult<()> {
    if is_codec_safe_name(name) {
        Ok(())
    } else {
        Err(WorldError::malformed(format!("name '{name}' cannot be encoded")))
    }
}

/// Encodes a section.
pub fn encode_section(section: &Section) -> WorldResult<String> {
    let mut out = String::from("structures{");
    for (origin, structure) in section.structures() {
        check_name(&structure.template)?;
        out.push_str(&origin.to_string());
        out.push_str("{template{");
        out.push_str(&structure.template);
        out.push_str("}}");
    }
    out.push_str("}chunks{");
    for (pos, chunk) in section.chunks() {
        encode_chunk(&mut out, *pos, chunk)?;
    }
    out.push('}');
    Ok(out)
}

fn encode_chunk(out: &mut String, pos: ChunkPos, chunk: &Chunk) -> WorldResult<()> {
    for name in chunk.palette() {
        check_name(name)?;
    }
    out.push_str(&pos.to_string());
    out.push_str("{block_palette{");
    out.push_str(&chunk.palette().join(","));
    out.push_str("}block_data{");
    let data: Vec<String> = chunk.data().iter().map(u8::to_string).collect();
    out.push_str(&data.join(","));
    out.push_str("}block_states{");
    for (local, state) in chunk.states() {
        out.push_str(&local.to_string());
        out.push('{');
        if let Some(health) = state.health {
            if !health.is_finite() {
                return Err(WorldError::malformed(format!(
                    "non-finite health {health} at [{local}] in chunk [{pos}]"
                )));
            }
            if health != 0.0 {
                out.push_str("health{");
                out.push_str(&health.to_string());
                out.push('}');
            }
        }
        out.push('}');
    }
    out.push_str("}}");
    Ok(())
}

/// Decodes a section, validating it against the grid geometry.
pub fn decode_section(text: &str, grid: &Grid) -> WorldResult<Section> {
    let mut root = parse_tree(text)?.into_fields("section")?;
    let mut section = Section::new();

    let structures = root
        .remove("structures")
        .ok_or_else(|| WorldError::malformed("section: missing 'structures'"))?;
    for (key, value) in structures.into_fields("structures")? {
        let origin: SpatialPos = key
            .parse()
            .map_err(|_| WorldError::malformed(format!("bad structure origin '{key}'")))?;
        let template = match value.into_fields("structure")?.remove("template") {
            Some(Node::Text(name)) => name,
            Some(other) => {
                return Err(WorldError::malformed(format!(
                    "structure [{key}]: template is a {}",
                    other.kind()
                )))
            },
            None => return Err(WorldError::malformed(format!("structure [{key}]: missing 'template'"))),
        };
        section.insert_structure(origin, Structure { template });
    }

    let chunks = root
        .remove("chunks")
        .ok_or_else(|| WorldError::malformed("section: missing 'chunks'"))?;
    if let Some(extra) = root.keys().next() {
        return Err(WorldError::malformed(format!("section: unexpected field '{extra}'")));
    }
    for (key, value) in chunks.into_fields("chunks")? {
        let rel: ChunkPos = key
            .parse()
            .map_err(|_| WorldError::malformed(format!("bad chunk key '{key}'")))?;
        let size = grid.section_size;
        let in_section = [(rel.x, size.x()), (rel.y, size.y()), (rel.z, size.z())]
            .iter()
            .all(|&(v, s)| (0..i64::from(s)).contains(&v));
        if !in_section {
            return Err(WorldError::malformed(format!("chunk [{rel}] is outside section {size}")));
        }
        let chunk = decode_chunk(value, grid, rel)?;
        section.insert_chunk(rel, chunk);
    }
    Ok(section)
}

fn decode_chunk(node: Node, grid: &Grid, rel: ChunkPos) -> WorldResult<Chunk> {
    let context = format!("chunk [{rel}]");
    let mut fields = node.into_fields(&context)?;

    let palette = match fields.remove("block_palette") {
        Some(Node::List(names)) => names,
        Some(Node::Text(name)) => vec![name],
        Some(other) => {
            return Err(WorldError::malformed(format!("{context}: palette is a {}", other.kind())))
        },
        None => return Err(WorldError::malformed(format!("{context}: missing 'block_palette'"))),
    };

    let data = match fields.remove("block_data") {
        Some(Node::Bytes(bytes)) => bytes,
        Some(Node::Number(n)) if n.fract() == 0.0 && (0.0..=255.0).contains(&n) => vec![n as u8],
        Some(other) => {
            return Err(WorldError::malformed(format!("{context}: grid is a {}", other.kind())))
        },
        None => return Err(WorldError::malformed(format!("{context}: missing 'block_data'"))),
    };
    if data.len() != grid.chunk_volume() {
        return Err(WorldError::malformed(format!(
            "{context}: grid holds {} voxels, expected {}",
            data.len(),
            grid.chunk_volume()
        )));
    }

    let mut states = BTreeMap::new();
    let state_nodes = fields
        .remove("block_states")
        .ok_or_else(|| WorldError::malformed(format!("{context}: missing 'block_states'")))?;
    for (key, value) in state_nodes.into_fields(&context)? {
        let local: LocalPos = key
            .parse()
            .map_err(|_| WorldError::malformed(format!("{context}: bad voxel key '{key}'")))?;
        grid.flatten(local)
            .map_err(|e| WorldError::malformed(format!("{context}: {e}")))?;
        let health = match value.into_fields(&context)?.remove("health") {
            Some(Node::Number(h)) => Some(h),
            Some(other) => {
                return Err(WorldError::malformed(format!(
                    "{context}: health at [{local}] is a {}",
                    other.kind()
                )))
            },
            None => None,
        };
        states.insert(local, BlockState { health });
    }

    Chunk::from_parts(palette, data, states)
        .map_err(|e| WorldError::malformed(format!("{context}: {e}")))
}
