use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use phylotree::tree::Tree as PhyloTree;

use crate::settings::{format_color, parse_color, Settings, BLOCK_NAME};
use crate::tree::{
    AttributeValue, CladeSummary, NodeId, Tree, TreeBundle, TreeFileFormat, CARTOON_ATTRIBUTE,
    COLLAPSE_ATTRIBUTE, HILIGHT_ATTRIBUTE,
};

/// Stand-in label for a quoted name while phylotree parses the topology.
const QUOTED_PLACEHOLDER: &str = "__quoted_label_";

pub fn load_trees(path: &Path) -> Result<TreeBundle> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read tree file: {}", path.display()))?;
    let bundle = parse_trees(&raw).with_context(|| format!("in {}", path.display()))?;
    info!(
        "loaded {} tree(s) from {} ({:?})",
        bundle.trees.len(),
        path.display(),
        bundle.format
    );
    Ok(bundle)
}

/// Parse the contents of a Newick or Nexus file.
pub fn parse_trees(raw: &str) -> Result<TreeBundle> {
    let format = detect_format(raw);
    let bundle = match format {
        TreeFileFormat::Newick => TreeBundle::new(format, parse_newick(raw)?),
        TreeFileFormat::Nexus => parse_nexus(raw)?,
    };
    if bundle.trees.is_empty() {
        bail!("tree file did not contain any trees");
    }
    Ok(bundle)
}

fn detect_format(raw: &str) -> TreeFileFormat {
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || (trimmed.starts_with('[') && trimmed.ends_with(']')) {
            continue;
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("#NEXUS") || upper.starts_with("BEGIN ") || upper.starts_with("TREE ") {
            return TreeFileFormat::Nexus;
        }
        return TreeFileFormat::Newick;
    }
    TreeFileFormat::Newick
}

fn parse_newick(raw: &str) -> Result<Vec<Tree>> {
    let mut trees = Vec::new();
    for statement in statements(raw)? {
        if statement.trim().is_empty() {
            continue;
        }
        let tree = build_tree(trees.len(), None, &statement)
            .with_context(|| format!("tree {}", trees.len() + 1))?;
        trees.push(tree);
    }
    Ok(trees)
}

#[derive(Debug, PartialEq)]
enum Block {
    Trees,
    Settings,
    Other,
}

fn parse_nexus(raw: &str) -> Result<TreeBundle> {
    let mut trees = Vec::new();
    let mut translation: HashMap<String, String> = HashMap::new();
    let mut settings_text = String::new();
    let mut block = None;

    for statement in statements(raw)? {
        let plain = strip_comments(&statement, false);
        let plain = strip_nexus_header(plain.trim());
        if plain.is_empty() {
            continue;
        }
        let lower = plain.to_ascii_lowercase();
        let keyword = lower.split_whitespace().next().unwrap_or_default();

        match (keyword, &block) {
            ("begin", _) => {
                let name = lower.split_whitespace().nth(1).unwrap_or_default();
                block = Some(match name {
                    "trees" => Block::Trees,
                    name if name == BLOCK_NAME => Block::Settings,
                    _ => Block::Other,
                });
                debug!("entering nexus block `{name}`");
            }
            ("end" | "endblock", _) => block = None,
            ("translate", Some(Block::Trees)) => {
                translation = parse_translation(plain.get(9..).unwrap_or_default());
            }
            ("tree" | "utree", Some(Block::Trees)) => {
                let body = strip_comments(&statement, true);
                let (label, newick) = split_tree_statement(strip_nexus_header(body.trim()))?;
                let mut tree = build_tree(trees.len(), label, newick)
                    .with_context(|| format!("tree {}", trees.len() + 1))?;
                translate_tips(&mut tree, &translation);
                trees.push(tree);
            }
            (_, Some(Block::Settings)) => {
                settings_text.push_str(plain);
                settings_text.push_str(";\n");
            }
            _ => {}
        }
    }

    let mut bundle = TreeBundle::new(TreeFileFormat::Nexus, trees);
    if !settings_text.is_empty() {
        match Settings::parse_block(&settings_text) {
            Ok(settings) => bundle.settings = settings,
            Err(err) => warn!("ignoring unreadable {BLOCK_NAME} block: {err}"),
        }
    }
    Ok(bundle)
}

fn strip_nexus_header(text: &str) -> &str {
    match text.get(..6) {
        Some(head) if head.eq_ignore_ascii_case("#nexus") => text[6..].trim_start(),
        _ => text,
    }
}

/// Split on `;` outside quotes and square-bracket comments.
fn statements(raw: &str) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    let mut in_comment = false;
    for c in raw.chars() {
        match c {
            _ if in_comment => in_comment = c != ']',
            '\'' | '"' if quote == Some(c) => quote = None,
            _ if quote.is_some() => {}
            '\'' | '"' => quote = Some(c),
            '[' => in_comment = true,
            ';' => {
                statements.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if quote.is_some() {
        bail!("unterminated quoted label");
    }
    if in_comment {
        bail!("unterminated comment");
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    Ok(statements)
}

/// Remove `[...]` comments outside quotes, optionally keeping `[&...]`
/// annotations.
fn strip_comments(text: &str, keep_annotations: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote = None;
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' if quote == Some(c) => quote = None,
            '\'' | '"' if quote.is_none() => quote = Some(c),
            '[' if quote.is_none() => {
                let keep = keep_annotations && chars.peek() == Some(&'&');
                if keep {
                    out.push(c);
                }
                for inner in chars.by_ref() {
                    if keep {
                        out.push(inner);
                    }
                    if inner == ']' {
                        break;
                    }
                }
                continue;
            }
            _ => {}
        }
        out.push(c);
    }
    out
}

/// `tree NAME = [&R] (...)` into its unquoted label and Newick text.
fn split_tree_statement(statement: &str) -> Result<(Option<String>, &str)> {
    let statement = statement.trim();
    let rest = statement
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim_start())
        .ok_or_else(|| anyhow!("missing tree definition: {statement}"))?;

    let mut quote = None;
    let mut equals = None;
    for (index, c) in rest.char_indices() {
        match c {
            '\'' | '"' if quote == Some(c) => quote = None,
            '\'' | '"' if quote.is_none() => quote = Some(c),
            '=' if quote.is_none() => {
                equals = Some(index);
                break;
            }
            _ => {}
        }
    }
    let equals = equals.ok_or_else(|| anyhow!("missing `=` in tree definition: {statement}"))?;
    let name = rest[..equals].trim().trim_start_matches('*').trim();
    let name = unquote(name);
    let label = (!name.is_empty()).then_some(name);
    Ok((label, rest[equals + 1..].trim()))
}

fn unquote(text: &str) -> String {
    let text = text.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = text.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
            return inner.replace(&format!("{quote}{quote}"), &quote.to_string());
        }
    }
    text.to_string()
}

fn parse_translation(body: &str) -> HashMap<String, String> {
    body.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (key, name) = entry.split_once(char::is_whitespace)?;
            Some((key.trim().to_string(), unquote(name)))
        })
        .collect()
}

fn translate_tips(tree: &mut Tree, translation: &HashMap<String, String>) {
    if translation.is_empty() {
        return;
    }
    for id in tree.external_nodes() {
        let node = &mut tree.nodes[id];
        if let Some(name) = node.name.as_ref().and_then(|name| translation.get(name)) {
            node.name = Some(name.clone());
        }
    }
}

/// Newick text with comments and quoted labels lifted out.
#[derive(Debug, Default)]
struct ScannedNewick {
    clean: String,
    tree_annotations: Vec<(String, AttributeValue)>,
    /// Node annotations in the order nodes close in the text.
    node_annotations: Vec<Vec<(String, AttributeValue)>>,
    quoted: Vec<String>,
}

fn scan_newick(newick: &str) -> Result<ScannedNewick> {
    let mut scanned = ScannedNewick::default();
    let mut pending = Vec::new();
    let mut chars = newick.chars().peekable();
    let mut terminated = false;
    let mut depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '[' => {
                let mut comment = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    comment.push(inner);
                }
                if !closed {
                    bail!("unterminated comment in newick");
                }
                if let Some(annotation) = comment.strip_prefix('&') {
                    pending.extend(parse_annotation(annotation));
                }
            }
            '\'' | '"' => {
                let mut label = String::new();
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == c {
                        if chars.peek() == Some(&c) {
                            chars.next();
                        } else {
                            closed = true;
                            break;
                        }
                    }
                    label.push(inner);
                }
                if !closed {
                    bail!("unterminated quoted label in newick");
                }
                scanned
                    .clean
                    .push_str(&format!("{QUOTED_PLACEHOLDER}{}", scanned.quoted.len()));
                scanned.quoted.push(label);
            }
            '(' => {
                if scanned.clean.is_empty() {
                    scanned.tree_annotations.append(&mut pending);
                }
                pending.clear();
                depth += 1;
                scanned.clean.push(c);
            }
            ',' | ')' => {
                if c == ')' {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| anyhow!("unbalanced `)` in newick"))?;
                }
                scanned.node_annotations.push(std::mem::take(&mut pending));
                scanned.clean.push(c);
            }
            ';' => {
                terminated = true;
                break;
            }
            c if c.is_whitespace() => {}
            c => scanned.clean.push(c),
        }
    }
    if !terminated && scanned.clean.is_empty() {
        bail!("empty newick tree");
    }
    if depth > 0 {
        bail!("unbalanced `(` in newick");
    }
    scanned.node_annotations.push(pending);
    scanned.clean.push(';');
    scanned
        .tree_annotations
        .retain(|(key, _)| !matches!(key.as_str(), "R" | "U" | "r" | "u"));
    Ok(scanned)
}

fn build_tree(index: usize, label: Option<String>, newick: &str) -> Result<Tree> {
    let scanned = scan_newick(newick)?;
    let phylo = PhyloTree::from_newick(&scanned.clean)
        .map_err(|err| anyhow!("failed to parse newick tree: {err}"))?;
    let mut tree = Tree::from_phylo(index, label, &phylo);
    if tree.root.is_none() {
        bail!("newick tree has no root");
    }

    for node in &mut tree.nodes {
        let Some(slot) = node
            .name
            .as_deref()
            .and_then(|name| name.strip_prefix(QUOTED_PLACEHOLDER))
            .and_then(|slot| slot.parse::<usize>().ok())
        else {
            continue;
        };
        node.name = scanned.quoted.get(slot).cloned().filter(|name| !name.is_empty());
    }

    let order = text_order(&tree);
    if order.len() == scanned.node_annotations.len() {
        for (id, annotations) in order.into_iter().zip(scanned.node_annotations) {
            for (key, value) in annotations {
                tree.nodes[id].set_attribute(key, value);
            }
        }
    } else {
        warn!(
            "tree {}: {} annotated positions for {} nodes, annotations dropped",
            index + 1,
            scanned.node_annotations.len(),
            order.len()
        );
    }
    tree.attributes.extend(scanned.tree_annotations);
    debug!("built tree {} with {} nodes", index + 1, tree.nodes.len());
    Ok(tree)
}

/// Nodes in the order they close in Newick text: children left to right,
/// then the parent.
fn text_order(tree: &Tree) -> Vec<NodeId> {
    let Some(root) = tree.root else {
        return Vec::new();
    };
    let mut order = Vec::with_capacity(tree.nodes.len());
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        stack.push((id, true));
        for child in tree.children(id).iter().rev() {
            stack.push((*child, false));
        }
    }
    order
}

/// Split on `,` outside braces and quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;
    for (index, c) in text.char_indices() {
        match c {
            '"' | '\'' if quote == Some(c) => quote = None,
            '"' | '\'' if quote.is_none() => quote = Some(c),
            '{' if quote.is_none() => depth += 1,
            '}' if quote.is_none() => depth = depth.saturating_sub(1),
            ',' if quote.is_none() && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Decode the body of a `[&key=value,...]` comment.
fn parse_annotation(body: &str) -> Vec<(String, AttributeValue)> {
    split_top_level(body)
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            match entry.split_once('=') {
                Some((key, value)) => {
                    let key = unquote(key);
                    let value = parse_annotation_value(&key, value.trim());
                    Some((key, value))
                }
                None => Some((unquote(entry), AttributeValue::Boolean(true))),
            }
        })
        .collect()
}

fn parse_scalar(raw: &str) -> AttributeValue {
    let raw = raw.trim();
    if raw.starts_with('"') || raw.starts_with('\'') {
        return AttributeValue::Text(unquote(raw));
    }
    if let Some(color) = raw.strip_prefix('#').and_then(parse_color) {
        return AttributeValue::Color(color);
    }
    match raw {
        "true" | "TRUE" => AttributeValue::Boolean(true),
        "false" | "FALSE" => AttributeValue::Boolean(false),
        _ => raw
            .parse::<f64>()
            .map(AttributeValue::Number)
            .unwrap_or_else(|_| AttributeValue::Text(raw.to_string())),
    }
}

fn parse_annotation_value(key: &str, raw: &str) -> AttributeValue {
    let Some(inner) = raw.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) else {
        return parse_scalar(raw);
    };
    let items: Vec<AttributeValue> = split_top_level(inner).into_iter().map(parse_scalar).collect();

    if matches!(key, CARTOON_ATTRIBUTE | COLLAPSE_ATTRIBUTE | HILIGHT_ATTRIBUTE) {
        if let Some(summary) = clade_summary(key, &items) {
            return AttributeValue::Clade(summary);
        }
    }

    let numbers: Option<Vec<f64>> = items.iter().map(AttributeValue::as_number).collect();
    match numbers {
        Some(numbers) if !numbers.is_empty() => AttributeValue::Range(numbers),
        _ => AttributeValue::Text(
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// `!cartoon={tips,height}`, `!collapse={"label",height}`,
/// `!hilight={tips,height,#colour}`.
fn clade_summary(key: &str, items: &[AttributeValue]) -> Option<CladeSummary> {
    let min_tip_height = items.get(1)?.as_number()?;
    let (tip_count, label) = match (key, items.first()?) {
        (COLLAPSE_ATTRIBUTE, AttributeValue::Text(label)) => (0, Some(label.clone())),
        (_, AttributeValue::Number(count)) if *count >= 0.0 => (*count as usize, None),
        _ => return None,
    };
    let color = items.get(2).and_then(AttributeValue::as_color);
    Some(CladeSummary {
        tip_count,
        min_tip_height,
        label,
        color,
    })
}

fn format_annotation_value(key: &str, value: &AttributeValue) -> String {
    match value {
        AttributeValue::Number(number) => number.to_string(),
        AttributeValue::Boolean(flag) => flag.to_string(),
        AttributeValue::Text(text) => format!("\"{}\"", text.replace('"', "'")),
        AttributeValue::Color(color) => format_color(*color),
        AttributeValue::Range(values) => format!(
            "{{{}}}",
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        ),
        AttributeValue::Colouring(_) => format!("{{{value}}}"),
        AttributeValue::Clade(summary) => {
            let mut items = match (key, &summary.label) {
                (COLLAPSE_ATTRIBUTE, Some(label)) => vec![format!("\"{label}\"")],
                _ => vec![summary.tip_count.to_string()],
            };
            items.push(summary.min_tip_height.to_string());
            if let Some(color) = summary.color {
                items.push(format_color(color));
            }
            format!("{{{}}}", items.join(","))
        }
    }
}

fn format_annotations(attributes: &BTreeMap<String, AttributeValue>) -> String {
    if attributes.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = attributes
        .iter()
        .map(|(key, value)| {
            let key = if key.chars().all(|c| c.is_alphanumeric() || "!_.%-".contains(c)) {
                key.clone()
            } else {
                format!("\"{key}\"")
            };
            format!("{key}={}", format_annotation_value(&key, value))
        })
        .collect();
    format!("[&{}]", entries.join(","))
}

fn quote_label(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| !c.is_whitespace() && !"()[]{}':;,=\"".contains(c));
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// Annotated Newick text for `tree`, including the trailing `;`.
pub fn write_newick(tree: &Tree) -> String {
    let Some(root) = tree.root else {
        return ";".to_string();
    };
    let mut out = String::new();
    // (node, next child index)
    let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
    while let Some((id, next)) = stack.pop() {
        let children = tree.children(id);
        if next < children.len() {
            out.push(if next == 0 { '(' } else { ',' });
            stack.push((id, next + 1));
            stack.push((children[next], 0));
            continue;
        }
        if !children.is_empty() {
            out.push(')');
        }
        let node = &tree.nodes[id];
        if let Some(name) = &node.name {
            out.push_str(&quote_label(name));
        }
        out.push_str(&format_annotations(&node.attributes));
        if let Some(length) = node.length.filter(|_| node.parent.is_some()) {
            out.push_str(&format!(":{length}"));
        }
    }
    out.push(';');
    out
}

/// A Nexus document with a taxa block, the trees, and the display settings.
pub fn write_nexus(trees: &[Tree], settings: &Settings) -> String {
    let mut taxa: Vec<String> = trees
        .iter()
        .flat_map(|tree| {
            tree.external_nodes()
                .into_iter()
                .filter_map(|id| tree.nodes[id].name.clone())
        })
        .collect();
    taxa.sort();
    taxa.dedup();

    let mut out = String::from("#NEXUS\n\nbegin taxa;\n");
    out.push_str(&format!("\tdimensions ntax={};\n\ttaxlabels\n", taxa.len()));
    for taxon in &taxa {
        out.push_str(&format!("\t{}\n", quote_label(taxon)));
    }
    out.push_str(";\nend;\n\nbegin trees;\n");
    for (index, tree) in trees.iter().enumerate() {
        let label = tree
            .label
            .clone()
            .unwrap_or_else(|| format!("tree_{}", index + 1));
        let annotations = format_annotations(&tree.attributes);
        out.push_str(&format!(
            "\ttree {} = [&R] {}{}\n",
            quote_label(&label),
            annotations,
            write_newick(tree)
        ));
    }
    out.push_str("end;\n");
    if !settings.is_empty() {
        out.push('\n');
        out.push_str(&settings.to_block());
    }
    out
}

pub fn save_nexus(path: &Path, trees: &[Tree], settings: &Settings) -> Result<()> {
    fs::write(path, write_nexus(trees, settings))
        .with_context(|| format!("failed to write tree file: {}", path.display()))?;
    info!("saved {} tree(s) to {}", trees.len(), path.display());
    Ok(())
}
