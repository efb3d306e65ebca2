//! Token stream -> [`Tree`].
//!
//! A plain cursor parser: `expect`-style helpers advance over the stream and
//! report the surrounding file on mismatch. [`Token::File`] markers are
//! transparently skipped, updating the file used for diagnostics.

use crate::error::{DtsError, Result};
use crate::lexer::Token;
use crate::tree::{Cell, Chunk, NodeId, Tree};

pub fn parse(tokens: &[Token]) -> Result<Tree> {
    Parser::new(tokens).run()
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    file: String,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Parser {
            tokens,
            pos: 0,
            file: String::new(),
        }
    }

    fn peek(&mut self) -> Option<&'t Token> {
        while let Some(Token::File(file)) = self.tokens.get(self.pos) {
            self.file = file.clone();
            self.pos += 1;
        }
        self.tokens.get(self.pos)
    }

    fn unexpected(&self, expected: &str) -> DtsError {
        let found = match self.tokens.get(self.pos) {
            Some(token) => token.to_string(),
            None => "end of input".to_string(),
        };
        DtsError::Unexpected {
            file: self.file.clone(),
            expected: expected.to_string(),
            found,
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        match self.peek() {
            Some(Token::Punct(p)) if *p == c => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected(&format!("`{c}`"))),
        }
    }

    fn take_name(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Name(name)) => {
                self.pos += 1;
                Ok(name.clone())
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn take_labels(&mut self) -> Vec<String> {
        let mut labels = Vec::new();
        while let Some(Token::Label(label)) = self.peek() {
            labels.push(label.clone());
            self.pos += 1;
        }
        labels
    }

    fn take_include(&mut self, tree: &mut Tree) -> Result<()> {
        match self.peek() {
            Some(Token::IncludePath(path)) => {
                tree.includes.insert(path.clone());
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.unexpected("an include path")),
        }
    }

    fn run(mut self) -> Result<Tree> {
        let mut tree = Tree::new();
        let mut seen_version = false;

        // Header: /dts-v1/, /plugin/, /memreserve/ and header includes.
        while let Some(token) = self.peek() {
            match token {
                Token::Version => {
                    self.pos += 1;
                    self.expect_punct(';')?;
                    if seen_version {
                        return Err(DtsError::DuplicateVersion {
                            file: self.file.clone(),
                        });
                    }
                    seen_version = true;
                }
                Token::Plugin => {
                    self.pos += 1;
                    self.expect_punct(';')?;
                    tree.plugin = true;
                }
                Token::MemReserve => {
                    self.pos += 1;
                    let start = self.take_name()?;
                    let length = self.take_name()?;
                    self.expect_punct(';')?;
                    tree.memreserves.insert((start, length));
                }
                Token::Include => {
                    self.pos += 1;
                    self.take_include(&mut tree)?;
                }
                _ => break,
            }
        }
        if !seen_version {
            return Err(DtsError::MissingVersion {
                file: self.file.clone(),
            });
        }

        // Top-level bodies.
        while let Some(token) = self.peek() {
            match token {
                Token::Punct('/') => {
                    self.pos += 1;
                    log::trace!("top level: /");
                    self.expect_punct('{')?;
                    let root = tree.root();
                    self.node_body(&mut tree, root)?;
                    self.expect_punct('}')?;
                    self.expect_punct(';')?;
                }
                Token::Label(_) | Token::Ref(_) => {
                    let labels = self.take_labels();
                    let target = match self.peek() {
                        Some(Token::Ref(label)) => label.clone(),
                        _ => return Err(self.unexpected("`&label`")),
                    };
                    self.pos += 1;
                    let id = tree
                        .find_label(&target)
                        .ok_or_else(|| DtsError::UnknownLabel(target.clone()))?;
                    for label in &labels {
                        tree.add_label(id, label)?;
                    }
                    log::trace!("reopen &{target}");
                    self.expect_punct('{')?;
                    self.node_body(&mut tree, id)?;
                    self.expect_punct('}')?;
                    self.expect_punct(';')?;
                }
                Token::DeleteNode => {
                    self.pos += 1;
                    let target = match self.peek() {
                        Some(Token::Ref(label)) => label.clone(),
                        _ => return Err(self.unexpected("`&label`")),
                    };
                    self.pos += 1;
                    self.expect_punct(';')?;
                    let id = tree
                        .find_label(&target)
                        .ok_or_else(|| DtsError::UnknownLabel(target.clone()))?;
                    tree.delete_node(id);
                }
                Token::Include => {
                    self.pos += 1;
                    self.take_include(&mut tree)?;
                }
                other => {
                    log::warn!("{}: ignoring junk at top level: `{other}`", self.file);
                    self.pos += 1;
                }
            }
        }
        Ok(tree)
    }

    fn node_body(&mut self, tree: &mut Tree, node: NodeId) -> Result<()> {
        loop {
            match self.peek() {
                None => return Err(self.unexpected("`}`")),
                Some(Token::Punct('}')) => return Ok(()),
                Some(Token::DeleteNode) => {
                    self.pos += 1;
                    let name = self.take_name()?;
                    self.expect_punct(';')?;
                    match tree.child(node, &name) {
                        Some(child) => tree.delete_node(child),
                        None => log::warn!("no node `{name}` to delete"),
                    }
                }
                Some(Token::DeleteProp) => {
                    self.pos += 1;
                    let name = self.take_name()?;
                    self.expect_punct(';')?;
                    if !tree.delete_property(node, &name) {
                        log::warn!("no property `{name}` to delete");
                    }
                }
                Some(Token::Include) => {
                    self.pos += 1;
                    self.take_include(tree)?;
                }
                Some(Token::Label(_) | Token::Name(_) | Token::Ref(_)) => {
                    let labels = self.take_labels();

                    // `&label { ... }` reopens a node from anywhere.
                    if let Some(Token::Ref(target)) = self.peek() {
                        let target = target.clone();
                        self.pos += 1;
                        let id = tree
                            .find_label(&target)
                            .ok_or_else(|| DtsError::UnknownLabel(target.clone()))?;
                        for label in &labels {
                            tree.add_label(id, label)?;
                        }
                        self.expect_punct('{')?;
                        self.node_body(tree, id)?;
                        self.expect_punct('}')?;
                        self.expect_punct(';')?;
                        continue;
                    }

                    let name = self.take_name()?;
                    match self.peek() {
                        Some(Token::Punct('{')) => {
                            self.pos += 1;
                            log::trace!("node {name}");
                            let child = tree.child_or_add(node, &name);
                            for label in &labels {
                                tree.add_label(child, label)?;
                            }
                            self.node_body(tree, child)?;
                            self.expect_punct('}')?;
                            self.expect_punct(';')?;
                        }
                        Some(Token::Punct('=')) => {
                            self.pos += 1;
                            if !labels.is_empty() {
                                log::warn!(
                                    "{}: labels on property `{name}` are ignored",
                                    self.file
                                );
                            }
                            let chunks = self.value_chunks()?;
                            self.expect_punct(';')?;
                            log::trace!("prop {name} ({} chunks)", chunks.len());
                            tree.set_property(node, &name, chunks)?;
                        }
                        Some(Token::Punct(';')) => {
                            self.pos += 1;
                            if !labels.is_empty() {
                                log::warn!(
                                    "{}: labels on property `{name}` are ignored",
                                    self.file
                                );
                            }
                            log::trace!("prop {name} (boolean)");
                            tree.set_property(node, &name, Vec::new())?;
                        }
                        _ => return Err(self.unexpected("`{`, `=` or `;`")),
                    }
                }
                Some(_) => return Err(self.unexpected("a node or property")),
            }
        }
    }

    fn value_chunks(&mut self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        loop {
            let chunk = match self.peek() {
                Some(Token::Str(body)) => {
                    self.pos += 1;
                    Chunk::Str(body.clone())
                }
                Some(Token::Ref(label)) => {
                    self.pos += 1;
                    Chunk::Ref(label.clone())
                }
                Some(Token::Bits) => {
                    self.pos += 1;
                    let size = self.take_name()?;
                    let bits: usize = size.parse().map_err(|_| DtsError::BadBits(size.clone()))?;
                    if !matches!(bits, 8 | 16 | 32 | 64) {
                        return Err(DtsError::BadBits(size));
                    }
                    self.expect_punct('<')?;
                    Chunk::Cells {
                        size: bits / 8,
                        items: self.cell_items()?,
                    }
                }
                Some(Token::Punct('<')) => {
                    self.pos += 1;
                    Chunk::Cells {
                        size: 4,
                        items: self.cell_items()?,
                    }
                }
                Some(Token::Punct('[')) => {
                    self.pos += 1;
                    let mut items = Vec::new();
                    loop {
                        match self.peek() {
                            Some(Token::Punct(']')) => {
                                self.pos += 1;
                                break;
                            }
                            Some(Token::Name(byte)) => {
                                items.push(byte.clone());
                                self.pos += 1;
                            }
                            _ => return Err(self.unexpected("`]`")),
                        }
                    }
                    Chunk::Bytes(items)
                }
                _ => return Err(self.unexpected("a value")),
            };
            chunks.push(chunk);
            match self.peek() {
                Some(Token::Punct(',')) => self.pos += 1,
                _ => return Ok(chunks),
            }
        }
    }

    fn cell_items(&mut self) -> Result<Vec<Cell>> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Punct('>')) => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(Token::Name(text)) => {
                    items.push(Cell::Num(text.clone()));
                    self.pos += 1;
                }
                Some(Token::Paren(text)) => {
                    items.push(Cell::Num(text.clone()));
                    self.pos += 1;
                }
                Some(Token::Char(body)) => {
                    items.push(Cell::Num(format!("'{body}'")));
                    self.pos += 1;
                }
                Some(Token::Ref(label)) => {
                    items.push(Cell::Ref(label.clone()));
                    self.pos += 1;
                }
                _ => return Err(self.unexpected("`>`")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFiles;
    use crate::tokenizer::tokenize;

    fn parse_str(text: &str) -> Result<Tree> {
        let mut mem = MemoryFiles::new();
        mem.insert("test.dts", text);
        parse(&tokenize(&mem, "test.dts").unwrap())
    }

    #[test]
    fn minimal_plugin() {
        let tree = parse_str(
            "/dts-v1/;\n/plugin/;\n/ {\n\tfragment@0 {\n\t\ttarget-path = \"/soc\";\n\t\t__overlay__ {\n\t\t\tfoo { status = \"okay\"; };\n\t\t};\n\t};\n};\n",
        )
        .unwrap();
        assert!(tree.plugin);
        let root = tree.root();
        let fragment = tree.child(root, "fragment@0").unwrap();
        assert_eq!(
            tree.property(fragment, "target-path").unwrap().chunks,
            vec![Chunk::Str("/soc".into())]
        );
        let overlay = tree.child(fragment, "__overlay__").unwrap();
        let foo = tree.child(overlay, "foo").unwrap();
        assert_eq!(
            tree.property(foo, "status").unwrap().chunks,
            vec![Chunk::Str("okay".into())]
        );
    }

    #[test]
    fn header_items() {
        let tree = parse_str(
            "/dts-v1/;\n#include <dt-bindings/gpio/gpio.h>\n/memreserve/ 0x0 0x4000;\n/memreserve/ 0x0 0x4000;\n/ { };\n",
        )
        .unwrap();
        assert!(!tree.plugin);
        assert_eq!(tree.includes.len(), 1);
        assert!(tree.includes.contains("<dt-bindings/gpio/gpio.h>"));
        assert_eq!(tree.memreserves.len(), 1);
    }

    #[test]
    fn missing_version_fails() {
        assert!(matches!(
            parse_str("/ { };\n"),
            Err(DtsError::MissingVersion { .. })
        ));
    }

    #[test]
    fn labels_and_reopening() {
        let tree = parse_str(
            "/dts-v1/;\n/ {\n\tuart0: serial@7e201000 {\n\t\tstatus = \"disabled\";\n\t};\n};\n&uart0 {\n\tstatus = \"okay\";\n};\nalt: &uart0 { };\n",
        )
        .unwrap();
        let uart = tree.find_label("uart0").unwrap();
        assert_eq!(tree.find_label("alt"), Some(uart));
        assert_eq!(tree.node(uart).labels, vec!["uart0", "alt"]);
        assert_eq!(
            tree.property(uart, "status").unwrap().chunks,
            vec![Chunk::Str("okay".into())]
        );
    }

    #[test]
    fn duplicate_label_fails() {
        assert!(matches!(
            parse_str("/dts-v1/;\n/ {\n\tx: a { };\n\tx: b { };\n};\n"),
            Err(DtsError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn unknown_label_fails() {
        assert!(matches!(
            parse_str("/dts-v1/;\n&nope { };\n"),
            Err(DtsError::UnknownLabel(_))
        ));
    }

    #[test]
    fn delete_node_and_property() {
        let tree = parse_str(
            "/dts-v1/;\n/ {\n\tkeep { a = <1>; b = <2>; /delete-property/ a; };\n\tgone@1 { };\n\t/delete-node/ gone;\n};\n",
        )
        .unwrap();
        let root = tree.root();
        let keep = tree.child(root, "keep").unwrap();
        assert!(tree.property(keep, "a").is_none());
        assert!(tree.property(keep, "b").is_some());
        assert!(tree.child(root, "gone").is_none());
    }

    #[test]
    fn delete_labeled_node_at_top_level() {
        let tree = parse_str(
            "/dts-v1/;\n/ {\n\tx: victim { };\n};\n/delete-node/ &x;\n",
        )
        .unwrap();
        assert!(tree.child(tree.root(), "victim").is_none());
        assert!(tree.find_label("x").is_none());
    }

    #[test]
    fn value_chunk_shapes() {
        let tree = parse_str(
            "/dts-v1/;\n/ {\n\tn {\n\t\tcompat = \"a\", \"b\";\n\t\tcells = <0x1 2 (-3) &phy>;\n\t\thalf = /bits/ 16 <0x1234>;\n\t\tmac = [00 11 22];\n\t\tlink = &phy;\n\t\tflag;\n\t};\n\tphy: ethernet-phy { };\n};\n",
        )
        .unwrap();
        let n = tree.child(tree.root(), "n").unwrap();
        assert_eq!(
            tree.property(n, "compat").unwrap().chunks,
            vec![Chunk::Str("a".into()), Chunk::Str("b".into())]
        );
        assert_eq!(
            tree.property(n, "cells").unwrap().chunks,
            vec![Chunk::Cells {
                size: 4,
                items: vec![
                    Cell::Num("0x1".into()),
                    Cell::Num("2".into()),
                    Cell::Num("(-3)".into()),
                    Cell::Ref("phy".into()),
                ],
            }]
        );
        assert_eq!(
            tree.property(n, "half").unwrap().chunks,
            vec![Chunk::Cells {
                size: 2,
                items: vec![Cell::Num("0x1234".into())],
            }]
        );
        assert_eq!(
            tree.property(n, "mac").unwrap().chunks,
            vec![Chunk::Bytes(vec!["00".into(), "11".into(), "22".into()])]
        );
        assert_eq!(
            tree.property(n, "link").unwrap().chunks,
            vec![Chunk::Ref("phy".into())]
        );
        assert!(tree.property(n, "flag").unwrap().chunks.is_empty());
    }

    #[test]
    fn bad_bits_size_fails() {
        assert!(matches!(
            parse_str("/dts-v1/;\n/ { x = /bits/ 24 <1>; };\n"),
            Err(DtsError::BadBits(_))
        ));
    }
}
