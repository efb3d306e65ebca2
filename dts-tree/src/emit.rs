//! Serialize a [`Tree`] back to DTS text.

use crate::tree::{address_order, Cell, Chunk, NodeId, Tree};

/// Render the tree as DTS source. With `sort`, properties are ordered by
/// name, children by unit address and labels lexically, which makes the
/// output independent of input ordering.
pub fn emit(tree: &Tree, sort: bool) -> String {
    let mut out = String::new();
    out.push_str("/dts-v1/;\n");
    if tree.plugin {
        out.push_str("/plugin/;\n");
    }
    for include in tree.includes.iter() {
        out.push_str(&format!("#include {include}\n"));
    }
    for (start, length) in tree.memreserves.iter() {
        out.push_str(&format!("/memreserve/ {start} {length};\n"));
    }
    out.push('\n');
    emit_node(tree, tree.root(), 0, sort, &mut out);
    out
}

fn emit_node(tree: &Tree, id: NodeId, depth: usize, sort: bool, out: &mut String) {
    let node = tree.node(id);
    let indent = "\t".repeat(depth);

    let mut labels: Vec<&String> = node.labels.iter().collect();
    if sort {
        labels.sort();
    }
    out.push_str(&indent);
    for label in labels {
        out.push_str(&format!("{label}: "));
    }
    out.push_str(&node.name);
    out.push_str(" {\n");

    let mut props: Vec<_> = node.props.iter().collect();
    if sort {
        props.sort_by(|a, b| a.name.cmp(&b.name));
    }
    for prop in props {
        out.push_str(&format!("{indent}\t{}", prop.name));
        if !prop.chunks.is_empty() {
            out.push_str(" = ");
            let parts: Vec<String> = prop.chunks.iter().map(render_chunk).collect();
            out.push_str(&parts.join(", "));
        }
        out.push_str(";\n");
    }

    let mut children = node.children().to_vec();
    if sort {
        children.sort_by(|&a, &b| address_order(&tree.node(a).name, &tree.node(b).name));
    }
    for child in children {
        emit_node(tree, child, depth + 1, sort, out);
    }

    out.push_str(&format!("{indent}}};\n"));
}

fn render_chunk(chunk: &Chunk) -> String {
    match chunk {
        Chunk::Str(body) => format!("\"{body}\""),
        Chunk::Ref(label) => format!("&{label}"),
        Chunk::Cells { size, items } => {
            let body = items
                .iter()
                .map(|item| match item {
                    Cell::Num(text) => text.clone(),
                    Cell::Ref(label) => format!("&{label}"),
                })
                .collect::<Vec<_>>()
                .join(" ");
            if *size == 4 {
                format!("<{body}>")
            } else {
                format!("/bits/ {} <{body}>", size * 8)
            }
        }
        Chunk::Bytes(items) => format!("[{}]", items.join(" ")),
    }
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

    fn reparse(text: &str) -> Tree {
        tree_of(text)
    }

    #[test]
    fn round_trip_preserves_the_tree() {
        let source = "/dts-v1/;\n/plugin/;\n#include <dt-bindings/gpio/gpio.h>\n/memreserve/ 0x0 0x4000;\n/ {\n\tfragment@0 {\n\t\ttarget-path = \"/soc\";\n\t\t__overlay__ {\n\t\t\tfoo: widget@10 {\n\t\t\t\tstatus = \"okay\";\n\t\t\t\treg = <0x10 1>;\n\t\t\t\thalf = /bits/ 16 <0xbeef>;\n\t\t\t\tmac = [00 11 22];\n\t\t\t\tlink = &foo, \"name\";\n\t\t\t\tflag;\n\t\t\t};\n\t\t};\n\t};\n};\n";
        let original = tree_of(source);
        let emitted = emit(&original, false);
        let reparsed = reparse(&emitted);
        assert_eq!(original, reparsed);
    }

    #[test]
    fn sorted_emission_is_deterministic() {
        let a = tree_of(
            "/dts-v1/;\n/ {\n\tzeta { b = <1>; a = <2>; };\n\tnode@10 { };\n\tnode@2 { };\n\talpha { };\n};\n",
        );
        let b = tree_of(
            "/dts-v1/;\n/ {\n\talpha { };\n\tnode@2 { };\n\tnode@10 { };\n\tzeta { a = <2>; b = <1>; };\n};\n",
        );
        assert_eq!(emit(&a, true), emit(&b, true));
    }

    #[test]
    fn sorted_children_follow_unit_addresses() {
        let tree = tree_of(
            "/dts-v1/;\n/ {\n\tbare { };\n\tnode@10 { };\n\tnode@2 { };\n};\n",
        );
        let text = emit(&tree, true);
        let pos = |needle: &str| text.find(needle).unwrap();
        assert!(pos("node@2") < pos("node@10"));
        assert!(pos("node@10") < pos("bare"));
    }

    #[test]
    fn labels_precede_the_node_name() {
        let tree = tree_of("/dts-v1/;\n/ {\n\tb: a: uart@0 { };\n};\n");
        assert!(emit(&tree, false).contains("b: a: uart@0 {"));
        assert!(emit(&tree, true).contains("a: b: uart@0 {"));
    }
}
