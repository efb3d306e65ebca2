//! The `dtparam` engine.
//!
//! A parameter is applied through the tree's `__overrides__` node, whose
//! entries are sequences of `(target, declaration)` pairs. The declaration
//! string encodes where and how the value lands: an integer patched into a
//! property at a byte offset, a boolean toggling a property's presence, a
//! whole-string write, or the fragment enable/disable syntax when the target
//! cell is a literal `0`.

use crate::error::{DtsError, Result};
use crate::tree::{Cell, Chunk, NodeId, Tree};
use crate::value::{self, IntValue};

enum Target {
    Node(String),
    Fragments,
}

/// Apply one `name[=value]` parameter binding to the tree.
pub fn apply_parameter(tree: &mut Tree, name: &str, value_text: Option<&str>) -> Result<()> {
    let overrides = tree
        .child(tree.root(), "__overrides__")
        .ok_or(DtsError::MissingOverrides)?;
    let chunks = tree
        .property(overrides, name)
        .ok_or_else(|| DtsError::UnknownParameter(name.to_string()))?
        .chunks
        .clone();

    let mut i = 0;
    while i < chunks.len() {
        let target = match &chunks[i] {
            Chunk::Cells { items, .. } if items.len() == 1 => match &items[0] {
                Cell::Ref(label) => Target::Node(label.clone()),
                Cell::Num(n) if value::is_zero(n) => Target::Fragments,
                Cell::Num(n) => {
                    return Err(DtsError::BadOverride(format!(
                        "{name}: `{n}` is not a target"
                    )))
                }
            },
            Chunk::Ref(label) => Target::Node(label.clone()),
            _ => {
                return Err(DtsError::BadOverride(format!(
                    "{name}: expected a target reference"
                )))
            }
        };
        i += 1;
        let decl = match chunks.get(i) {
            Some(Chunk::Str(decl)) => decl.clone(),
            _ => {
                return Err(DtsError::BadOverride(format!(
                    "{name}: missing declaration string"
                )))
            }
        };
        i += 1;

        match target {
            Target::Fragments => apply_fragment_ops(tree, &decl, value_text)?,
            Target::Node(label) => {
                let node = tree
                    .find_label(&label)
                    .ok_or_else(|| DtsError::UnknownLabel(label.clone()))?;
                if let Some(prop) = decl.strip_suffix('?') {
                    apply_boolean(tree, node, prop, value_text)?;
                } else if let Some(int_decl) = parse_integer_decl(&decl) {
                    if apply_integer(tree, node, &int_decl, value_text, chunks.get(i))? {
                        i += 1;
                    }
                } else {
                    apply_string(tree, node, &decl, value_text)?;
                }
            }
        }
    }
    Ok(())
}

/// A parsed `PROP<typechar>OFFSET[=ASSIGN]` declaration. Width 0 is the `"`
/// typechar, a string write.
struct IntegerDecl {
    prop: String,
    width: usize,
    offset: usize,
    /// `Some("")` means the assigned value lives in the next cells chunk.
    assign: Option<String>,
}

fn parse_integer_decl(decl: &str) -> Option<IntegerDecl> {
    for (pos, ch) in decl.char_indices() {
        let width = match ch {
            '.' => 1,
            ';' => 2,
            ':' => 4,
            '#' => 8,
            '"' => 0,
            _ => continue,
        };
        if pos == 0 {
            continue;
        }
        let rest = &decl[pos + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            continue;
        }
        let (offset, tail) = rest.split_at(digits);
        let assign = match tail.strip_prefix('=') {
            Some(assign) => Some(assign.to_string()),
            None if tail.is_empty() => None,
            None => continue,
        };
        return Some(IntegerDecl {
            prop: decl[..pos].to_string(),
            width,
            offset: offset.parse().ok()?,
            assign,
        });
    }
    None
}

/// Returns true if the value was taken from the next chunk (empty `=`).
fn apply_integer(
    tree: &mut Tree,
    node: NodeId,
    decl: &IntegerDecl,
    value_text: Option<&str>,
    next_chunk: Option<&Chunk>,
) -> Result<bool> {
    let mut consumed = false;
    let text = match &decl.assign {
        None => value_text
            .ok_or_else(|| DtsError::BadInteger(format!("{} (no value given)", decl.prop)))?
            .to_string(),
        Some(assign) if !assign.is_empty() => assign.clone(),
        Some(_) => {
            consumed = true;
            match next_chunk {
                Some(Chunk::Cells { items, .. }) if items.len() == 1 => match &items[0] {
                    Cell::Num(n) => n.clone(),
                    Cell::Ref(label) => format!("&{label}"),
                },
                _ => {
                    return Err(DtsError::BadOverride(format!(
                        "{}: missing assigned value",
                        decl.prop
                    )))
                }
            }
        }
    };

    if decl.width == 0 {
        tree.set_property(node, &decl.prop, vec![Chunk::Str(text)])?;
        return Ok(consumed);
    }

    let value = value::integer_value(&text, decl.width)?;

    // `reg` overrides keep the unit address in sync, whether or not the
    // property itself exists.
    if decl.prop == "reg" {
        if let IntValue::Num(n) = value {
            tree.set_unit_address(node, n);
        }
        if tree.property(node, &decl.prop).is_none() {
            return Ok(consumed);
        }
    }

    if decl.offset % decl.width != 0 {
        return Err(DtsError::UnalignedOffset {
            offset: decl.offset,
            size: decl.width,
        });
    }

    if tree.property(node, &decl.prop).is_none() {
        tree.set_property(
            node,
            &decl.prop,
            vec![Chunk::Cells {
                size: decl.width,
                items: Vec::new(),
            }],
        )?;
    }

    write_at_offset(tree, node, decl, &value)?;
    Ok(consumed)
}

fn write_at_offset(
    tree: &mut Tree,
    node: NodeId,
    decl: &IntegerDecl,
    value: &IntValue,
) -> Result<()> {
    let property = tree
        .property_mut(node, &decl.prop)
        .ok_or_else(|| DtsError::BadOverride(decl.prop.clone()))?;
    if property.chunks.is_empty() {
        property.chunks.push(Chunk::Cells {
            size: decl.width,
            items: Vec::new(),
        });
    }

    let mut consumed = 0;
    let last = property.chunks.len() - 1;
    for (index, chunk) in property.chunks.iter_mut().enumerate() {
        let len = chunk.byte_len();
        // Offsets past the end of the value extend the final chunk.
        if decl.offset < consumed + len || index == last {
            return write_in_chunk(chunk, decl, decl.offset - consumed, value);
        }
        consumed += len;
    }
    Err(DtsError::BadOverride(format!(
        "{}: empty property value",
        decl.prop
    )))
}

fn write_in_chunk(
    chunk: &mut Chunk,
    decl: &IntegerDecl,
    local: usize,
    value: &IntValue,
) -> Result<()> {
    match chunk {
        Chunk::Cells { items, .. } => {
            let index = local / decl.width;
            let item = match value {
                IntValue::Num(n) => Cell::Num(n.to_string()),
                IntValue::Ref(label) => Cell::Ref(label.clone()),
            };
            while items.len() < index {
                items.push(Cell::Num("0".to_string()));
            }
            if items.len() == index {
                items.push(item);
            } else {
                items[index] = item;
            }
            Ok(())
        }
        Chunk::Bytes(items) => {
            let byte = match value {
                IntValue::Num(n) => format!("{:02x}", n & 0xff),
                IntValue::Ref(_) => {
                    return Err(DtsError::BadOverride(format!(
                        "{}: a reference cannot patch a byte string",
                        decl.prop
                    )))
                }
            };
            while items.len() < local {
                items.push("00".to_string());
            }
            if items.len() == local {
                items.push(byte);
            } else {
                items[local] = byte;
            }
            Ok(())
        }
        Chunk::Str(_) | Chunk::Ref(_) => Err(DtsError::BadOverride(format!(
            "{}: offset {} does not land in a patchable chunk",
            decl.prop, decl.offset
        ))),
    }
}

fn apply_boolean(tree: &mut Tree, node: NodeId, prop: &str, value_text: Option<&str>) -> Result<()> {
    if value::boolean_value(value_text)? {
        if tree.property(node, prop).is_none() {
            tree.set_property(node, prop, Vec::new())?;
        }
    } else {
        tree.delete_property(node, prop);
    }
    Ok(())
}

fn apply_string(tree: &mut Tree, node: NodeId, decl: &str, value_text: Option<&str>) -> Result<()> {
    let (prop, assign) = match decl.split_once('=') {
        Some((prop, assign)) => (prop, Some(assign.to_string())),
        None => (decl, None),
    };
    if prop.is_empty() {
        return Err(DtsError::BadOverride(decl.to_string()));
    }
    let text = assign
        .or_else(|| value_text.map(str::to_string))
        .unwrap_or_default();
    tree.set_property(node, prop, vec![Chunk::Str(text)])
}

/// Fragment enable/disable: `=N` and `+N` make fragment N track the
/// parameter's truth, `!N` and `-N` track its inverse. Re-applying with a
/// different value moves the fragments again, so the same declaration can
/// switch a set of fragments back and forth.
fn apply_fragment_ops(tree: &mut Tree, decl: &str, value_text: Option<&str>) -> Result<()> {
    let enabled = value::boolean_value(value_text)?;
    let ops =
        parse_fragment_ops(decl).ok_or_else(|| DtsError::BadOverride(decl.to_string()))?;
    for (op, number) in ops {
        let state = match op {
            '=' | '+' => enabled,
            _ => !enabled,
        };
        set_fragment_state(tree, number, state)?;
    }
    Ok(())
}

fn parse_fragment_ops(decl: &str) -> Option<Vec<(char, usize)>> {
    let mut ops = Vec::new();
    let mut rest = decl;
    while !rest.is_empty() {
        let op = rest.chars().next()?;
        if !"=!+-".contains(op) {
            return None;
        }
        rest = &rest[1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        ops.push((op, rest[..digits].parse().ok()?));
        rest = &rest[digits..];
    }
    if ops.is_empty() {
        None
    } else {
        Some(ops)
    }
}

fn find_fragment(tree: &Tree, number: usize) -> Result<NodeId> {
    let root = tree.root();
    tree.child(root, &format!("fragment@{number}"))
        .or_else(|| tree.child(root, &format!("fragment-{number}")))
        .ok_or_else(|| DtsError::MissingFragment(number.to_string()))
}

fn set_fragment_state(tree: &mut Tree, number: usize, enable: bool) -> Result<()> {
    let fragment = find_fragment(tree, number)?;
    let content = tree
        .child(fragment, "__overlay__")
        .or_else(|| tree.child(fragment, "__dormant__"))
        .ok_or_else(|| DtsError::MissingFragment(number.to_string()))?;
    tree.node_mut(content).name = if enable { "__overlay__" } else { "__dormant__" }.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFiles;
    use crate::{parse, tokenize};

    fn tree_of(text: &str) -> Tree {
        let mut mem = MemoryFiles::new();
        mem.insert("test.dts", text);
        parse(&tokenize(&mem, "test.dts").unwrap()).unwrap()
    }

    fn overlay_with(overrides: &str, body: &str) -> Tree {
        tree_of(&format!(
            "/dts-v1/;\n/plugin/;\n/ {{\n{body}\n\t__overrides__ {{\n{overrides}\n\t}};\n}};\n"
        ))
    }

    #[test]
    fn integer_override() {
        let mut tree = overlay_with(
            "\t\tspeed = <&foo>, \"clock-frequency:0\";",
            "\tfoo: i2c@7e804000 {\n\t\tclock-frequency = <100000>;\n\t};",
        );
        apply_parameter(&mut tree, "speed", Some("400000")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert_eq!(
            tree.property(foo, "clock-frequency").unwrap().chunks,
            vec![Chunk::cells(vec![Cell::Num("400000".into())])]
        );
    }

    #[test]
    fn integer_override_is_idempotent() {
        let mut tree = overlay_with(
            "\t\tspeed = <&foo>, \"clock-frequency:0\";",
            "\tfoo: i2c@7e804000 {\n\t\tclock-frequency = <100000>;\n\t};",
        );
        apply_parameter(&mut tree, "speed", Some("400000")).unwrap();
        let once = tree
            .property(tree.find_label("foo").unwrap(), "clock-frequency")
            .unwrap()
            .chunks
            .clone();
        apply_parameter(&mut tree, "speed", Some("400000")).unwrap();
        let twice = tree
            .property(tree.find_label("foo").unwrap(), "clock-frequency")
            .unwrap()
            .chunks
            .clone();
        assert_eq!(once, twice);
    }

    #[test]
    fn offset_extends_with_zero_padding() {
        let mut tree = overlay_with(
            "\t\tthird = <&foo>, \"vals:8\";",
            "\tfoo: node {\n\t\tvals = <1>;\n\t};",
        );
        apply_parameter(&mut tree, "third", Some("7")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert_eq!(
            tree.property(foo, "vals").unwrap().chunks,
            vec![Chunk::cells(vec![
                Cell::Num("1".into()),
                Cell::Num("0".into()),
                Cell::Num("7".into()),
            ])]
        );
    }

    #[test]
    fn unaligned_offset_fails() {
        let mut tree = overlay_with(
            "\t\tbad = <&foo>, \"vals:3\";",
            "\tfoo: node {\n\t\tvals = <1>;\n\t};",
        );
        assert!(matches!(
            apply_parameter(&mut tree, "bad", Some("7")),
            Err(DtsError::UnalignedOffset { .. })
        ));
    }

    #[test]
    fn missing_property_is_created_except_reg() {
        let mut tree = overlay_with(
            "\t\tval = <&foo>, \"fresh.0\";\n\t\taddr = <&foo>, \"reg:0\";",
            "\tfoo: sensor@48 { };",
        );
        apply_parameter(&mut tree, "val", Some("3")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert_eq!(
            tree.property(foo, "fresh").unwrap().chunks,
            vec![Chunk::Cells {
                size: 1,
                items: vec![Cell::Num("3".into())],
            }]
        );

        // `reg` is not created, but the unit address still moves.
        apply_parameter(&mut tree, "addr", Some("0x49")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert!(tree.property(foo, "reg").is_none());
        assert_eq!(tree.node(foo).name, "sensor@49");
    }

    #[test]
    fn reg_override_with_property_patches_both() {
        let mut tree = overlay_with(
            "\t\taddr = <&foo>, \"reg:0\";",
            "\tfoo: sensor@48 {\n\t\treg = <0x48>;\n\t};",
        );
        apply_parameter(&mut tree, "addr", Some("0x49")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert_eq!(tree.node(foo).name, "sensor@49");
        assert_eq!(
            tree.property(foo, "reg").unwrap().chunks,
            vec![Chunk::cells(vec![Cell::Num("73".into())])]
        );
    }

    #[test]
    fn boolean_override() {
        let mut tree = overlay_with(
            "\t\tturbo = <&foo>, \"fast-mode?\";",
            "\tfoo: node { };",
        );
        apply_parameter(&mut tree, "turbo", Some("on")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert!(tree.property(foo, "fast-mode").unwrap().chunks.is_empty());
        apply_parameter(&mut tree, "turbo", Some("off")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert!(tree.property(foo, "fast-mode").is_none());
    }

    #[test]
    fn string_override() {
        let mut tree = overlay_with(
            "\t\tname = <&foo>, \"label\";",
            "\tfoo: node { };",
        );
        apply_parameter(&mut tree, "name", Some("hello")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert_eq!(
            tree.property(foo, "label").unwrap().chunks,
            vec![Chunk::Str("hello".into())]
        );
    }

    #[test]
    fn literal_assignment_beats_the_value() {
        let mut tree = overlay_with(
            "\t\tfixed = <&foo>, \"vals:0=42\";",
            "\tfoo: node {\n\t\tvals = <1>;\n\t};",
        );
        apply_parameter(&mut tree, "fixed", Some("9000")).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert_eq!(
            tree.property(foo, "vals").unwrap().chunks,
            vec![Chunk::cells(vec![Cell::Num("42".into())])]
        );
    }

    #[test]
    fn empty_assignment_consumes_next_chunk() {
        let mut tree = overlay_with(
            "\t\tfixed = <&foo>, \"vals:0=\", <0x20>;",
            "\tfoo: node {\n\t\tvals = <1>;\n\t};",
        );
        apply_parameter(&mut tree, "fixed", None).unwrap();
        let foo = tree.find_label("foo").unwrap();
        assert_eq!(
            tree.property(foo, "vals").unwrap().chunks,
            vec![Chunk::cells(vec![Cell::Num("32".into())])]
        );
    }

    #[test]
    fn fragment_enable_seed() {
        let text = "/dts-v1/;\n/plugin/;\n/ {\n\tfragment@0 {\n\t\t__overlay__ { };\n\t};\n\tfragment@1 {\n\t\t__dormant__ { };\n\t};\n\t__overrides__ {\n\t\tsw = <0>, \"=0+1\";\n\t};\n};\n";
        let mut mem = MemoryFiles::new();
        mem.insert("o.dts", text);
        let mut tree = parse(&tokenize(&mem, "o.dts").unwrap()).unwrap();

        apply_parameter(&mut tree, "sw", Some("1")).unwrap();
        let f0 = tree.child(tree.root(), "fragment@0").unwrap();
        let f1 = tree.child(tree.root(), "fragment@1").unwrap();
        assert!(tree.child(f0, "__overlay__").is_some());
        assert!(tree.child(f1, "__overlay__").is_some());

        apply_parameter(&mut tree, "sw", Some("0")).unwrap();
        assert!(tree.child(f0, "__dormant__").is_some());
        assert!(tree.child(f1, "__dormant__").is_some());
    }

    #[test]
    fn fragment_inverse_op() {
        let text = "/dts-v1/;\n/plugin/;\n/ {\n\tfragment@0 {\n\t\t__overlay__ { };\n\t};\n\t__overrides__ {\n\t\tinv = <0>, \"!0\";\n\t};\n};\n";
        let mut mem = MemoryFiles::new();
        mem.insert("o.dts", text);
        let mut tree = parse(&tokenize(&mem, "o.dts").unwrap()).unwrap();

        apply_parameter(&mut tree, "inv", Some("1")).unwrap();
        let f0 = tree.child(tree.root(), "fragment@0").unwrap();
        assert!(tree.child(f0, "__dormant__").is_some());
    }

    #[test]
    fn missing_fragment_fails() {
        let mut tree = overlay_with("\t\tsw = <0>, \"=7\";", "\tfragment@0 { __overlay__ { }; };");
        assert!(matches!(
            apply_parameter(&mut tree, "sw", Some("1")),
            Err(DtsError::MissingFragment(_))
        ));
    }

    #[test]
    fn missing_overrides_and_unknown_parameter() {
        let mut tree = tree_of("/dts-v1/;\n/plugin/;\n/ { };\n");
        assert!(matches!(
            apply_parameter(&mut tree, "x", None),
            Err(DtsError::MissingOverrides)
        ));
        let mut tree = overlay_with("\t\tknown = <&foo>, \"p?\";", "\tfoo: node { };");
        assert!(matches!(
            apply_parameter(&mut tree, "unknown", None),
            Err(DtsError::UnknownParameter(_))
        ));
    }

    #[test]
    fn commuting_disjoint_parameters() {
        let overrides = "\t\ta = <&foo>, \"one:0\";\n\t\tb = <&foo>, \"two:0\";";
        let body = "\tfoo: node {\n\t\tone = <1>;\n\t\ttwo = <2>;\n\t};";
        let mut ab = overlay_with(overrides, body);
        apply_parameter(&mut ab, "a", Some("10")).unwrap();
        apply_parameter(&mut ab, "b", Some("20")).unwrap();
        let mut ba = overlay_with(overrides, body);
        apply_parameter(&mut ba, "b", Some("20")).unwrap();
        apply_parameter(&mut ba, "a", Some("10")).unwrap();
        assert_eq!(ab, ba);
    }
}
