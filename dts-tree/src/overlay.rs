//! Overlay composition: renumbering fragments, merging plugins together and
//! applying the result onto a base tree.

use crate::error::{DtsError, Result};
use crate::tree::{Cell, Chunk, NodeId, Tree};
use crate::value;

/// Split a `fragment@N` / `fragment-N` name into its separator and number.
fn fragment_number(name: &str) -> Option<(char, usize)> {
    let rest = name.strip_prefix("fragment")?;
    let mut chars = rest.chars();
    let sep = chars.next()?;
    if sep != '@' && sep != '-' {
        return None;
    }
    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((sep, digits.parse().ok()?))
}

/// Rename the tree's fragments to a contiguous run starting at `base`,
/// keeping their order and separators, and rewrite the fragment indices
/// mentioned by fragment-enable override declarations accordingly. Sets
/// `frag_count`.
pub fn renumber_fragments(tree: &mut Tree, base: usize) {
    let mut remap: Vec<(usize, usize)> = Vec::new();
    let children = tree.node(tree.root()).children().to_vec();
    let mut index = 0;
    for id in children {
        let name = tree.node(id).name.clone();
        let Some((sep, old)) = fragment_number(&name) else {
            continue;
        };
        let new = base + index;
        tree.node_mut(id).name = format!("fragment{sep}{new}");
        remap.push((old, new));
        index += 1;
    }
    tree.frag_count = index;

    let Some(overrides) = tree.child(tree.root(), "__overrides__") else {
        return;
    };
    for prop in &mut tree.node_mut(overrides).props {
        let mut zero_target = false;
        for chunk in &mut prop.chunks {
            match chunk {
                Chunk::Cells { items, .. }
                    if items.len() == 1
                        && matches!(&items[0], Cell::Num(n) if value::is_zero(n)) =>
                {
                    zero_target = true;
                }
                Chunk::Str(decl) if zero_target => {
                    *decl = renumber_ops(decl, &remap);
                    zero_target = false;
                }
                _ => zero_target = false,
            }
        }
    }
}

/// Rewrite every `[=!+-]<num>` occurrence through the remap. Numbers with no
/// remap entry refer to fragments outside this overlay and are left alone.
fn renumber_ops(decl: &str, remap: &[(usize, usize)]) -> String {
    let mut out = String::new();
    let mut rest = decl;
    while let Some(c) = rest.chars().next() {
        rest = &rest[c.len_utf8()..];
        out.push(c);
        if !"=!+-".contains(c) {
            continue;
        }
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            continue;
        }
        if let Ok(old) = rest[..digits].parse::<usize>() {
            let new = remap
                .iter()
                .find(|&&(from, _)| from == old)
                .map_or(old, |&(_, to)| to);
            out.push_str(&new.to_string());
        } else {
            out.push_str(&rest[..digits]);
        }
        rest = &rest[digits..];
    }
    out
}

/// Merge plugin `overlay` into plugin `base`: union the includes, renumber
/// and move the fragments over, uniquify clashing labels, and append the
/// overlay's `__overrides__` entries to the base's.
pub fn merge(base: &mut Tree, mut overlay: Tree) -> Result<()> {
    if base.frag_count == 0 {
        renumber_fragments(base, 0);
    }
    for include in std::mem::take(&mut overlay.includes) {
        base.includes.insert(include);
    }
    renumber_fragments(&mut overlay, base.frag_count);

    // Uniquify the overlay's labels against the base, then rewrite `&label`
    // terms inside cell vectors through the rename map. Whole-value label
    // references are left alone: they are expected to point into the
    // eventual base tree.
    let names: Vec<String> = overlay.labels().map(|(name, _)| name.to_string()).collect();
    let mut renames: Vec<(String, String)> = Vec::new();
    for label in names {
        if base.find_label(&label).is_none() {
            continue;
        }
        let mut k = 1;
        let fresh = loop {
            let candidate = format!("{label}_{k}");
            if base.find_label(&candidate).is_none() && overlay.find_label(&candidate).is_none() {
                break candidate;
            }
            k += 1;
        };
        overlay.rename_label(&label, &fresh);
        renames.push((label, fresh));
    }
    if !renames.is_empty() {
        for id in overlay.nodes_preorder() {
            for prop in &mut overlay.node_mut(id).props {
                for chunk in &mut prop.chunks {
                    let Chunk::Cells { items, .. } = chunk else {
                        continue;
                    };
                    for item in items {
                        if let Cell::Ref(label) = item {
                            if let Some((_, new)) =
                                renames.iter().find(|(old, _)| old == label)
                            {
                                *label = new.clone();
                            }
                        }
                    }
                }
            }
        }
    }

    // Move the fragments across, keeping any base `__overrides__` stashed
    // aside so it ends up after them.
    let stash = base.child(base.root(), "__overrides__");
    if let Some(id) = stash {
        base.detach(id);
    }

    let base_root = base.root();
    let overlay_root = overlay.root();
    for child in overlay.node(overlay_root).children().to_vec() {
        if fragment_number(&overlay.node(child).name).is_some() {
            base.adopt(base_root, &overlay, child)?;
        }
    }

    let overlay_overrides = overlay.child(overlay_root, "__overrides__");
    if stash.is_some() || overlay_overrides.is_some() {
        let combined = match stash {
            Some(id) => {
                base.attach(base_root, id);
                id
            }
            None => base.add_child(base_root, "__overrides__"),
        };
        if let Some(source) = overlay_overrides {
            for prop in overlay.node(source).props.clone() {
                if base.property(combined, &prop.name).is_some() {
                    return Err(DtsError::DuplicateOverride(prop.name));
                }
                base.node_mut(combined).props.push(prop);
            }
        }
    }

    base.frag_count += overlay.frag_count;
    Ok(())
}

/// Apply plugin `overlay` onto non-plugin `base`: resolve each live
/// fragment's target and splice its `__overlay__` subtree in.
pub fn apply(base: &mut Tree, overlay: &Tree) -> Result<()> {
    for include in overlay.includes.iter() {
        base.includes.insert(include.clone());
    }
    let overlay_root = overlay.root();
    for fragment in overlay.node(overlay_root).children().to_vec() {
        let name = overlay.node(fragment).name.clone();
        if fragment_number(&name).is_none() {
            continue;
        }
        // Dormant fragments are skipped.
        let Some(content) = overlay.child(fragment, "__overlay__") else {
            continue;
        };
        let target = resolve_target(base, overlay, fragment)
            .ok_or_else(|| DtsError::MissingTarget(name.clone()))?;
        apply_node(base, target, overlay, content)?;
    }
    Ok(())
}

/// A fragment names its target either through `target = <&label>` or through
/// an absolute (or alias) `target-path` string.
fn resolve_target(base: &Tree, overlay: &Tree, fragment: NodeId) -> Option<NodeId> {
    if let Some(prop) = overlay.property(fragment, "target") {
        return match prop.chunks.first()? {
            Chunk::Cells { items, .. } => match items.first()? {
                Cell::Ref(label) => base.find_label(label),
                Cell::Num(_) => None,
            },
            Chunk::Ref(label) => base.find_label(label),
            _ => None,
        };
    }
    if let Some(prop) = overlay.property(fragment, "target-path") {
        if let Some(Chunk::Str(path)) = prop.chunks.first() {
            return base.resolve_path(path);
        }
    }
    None
}

fn apply_node(base: &mut Tree, dst: NodeId, overlay: &Tree, src: NodeId) -> Result<()> {
    for prop in overlay.node(src).props.clone() {
        base.set_property(dst, &prop.name, prop.chunks)?;
    }
    for label in overlay.node(src).labels.clone() {
        base.add_label(dst, &label)?;
    }
    for child in overlay.node(src).children().to_vec() {
        let name = overlay.node(child).name.clone();
        let target = base.child_or_add(dst, &name);
        apply_node(base, target, overlay, child)?;
    }
    Ok(())
}
