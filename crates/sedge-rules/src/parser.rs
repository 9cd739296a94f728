//! Rule source parser.
//!
//! Line-oriented: blank lines and `#` comments are skipped, every other
//! line is one `pattern => replacement` rule. Pattern syntax:
//!
//! ```text
//! abc            literal symbols
//! \\ \n \r \t \( escapes (any escaped char is literal)
//! [abc] [^abc]   symbol classes
//! .              any symbol except end-of-source
//! \z             end-of-source
//! (…) | * + ?    grouping, alternation, quantifiers
//! <name:atom>    capture
//! $name          back-reference
//! ```
//!
//! Replacements are literal text with `$name` variable references
//! (`$match` is the whole-match pseudo-variable).

use crate::ast::{Node, NodeId, Tree};
use crate::error::{ParseError, ParseResult};
use sedge_types::Symbol;
use std::collections::BTreeSet;

/// A parsed rule set: the tree plus the ordered rule nodes.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub tree: Tree,
    pub root: NodeId,
    pub rules: Vec<(NodeId, NodeId)>,
}

/// Parse rule source into a [`RuleSet`].
pub fn parse_rules(source: &str) -> ParseResult<RuleSet> {
    let mut tree = Tree::new();
    let mut rules = Vec::new();
    let mut rule_ids = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx as u32 + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parser = LineParser::new(line, line_no);
        let (pattern, replacement) = parser.rule(&mut tree)?;
        let rule = tree.push(Node::Rule {
            pattern,
            replacement,
        });
        rules.push((pattern, replacement));
        rule_ids.push(rule);
    }

    if rule_ids.is_empty() {
        return Err(ParseError::new(1, 1, "rule source contains no rules"));
    }
    let root = tree.push(Node::RuleSet(rule_ids));
    Ok(RuleSet { tree, root, rules })
}

/// Cursor over one rule line.
struct LineParser {
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

impl LineParser {
    fn new(line: &str, line_no: u32) -> LineParser {
        LineParser {
            chars: line.chars().collect(),
            pos: 0,
            line: line_no,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn col(&self) -> u32 {
        self.pos as u32 + 1
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, self.col(), message)
    }

    /// True when the cursor sits on the unescaped `=>` separator.
    fn at_arrow(&self) -> bool {
        self.chars.get(self.pos) == Some(&'=') && self.chars.get(self.pos + 1) == Some(&'>')
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') || self.peek() == Some('\t') {
            self.pos += 1;
        }
    }

    /// `pattern => replacement`
    fn rule(&mut self, tree: &mut Tree) -> ParseResult<(NodeId, NodeId)> {
        self.skip_spaces();
        let pattern = self.alternation(tree)?;
        self.skip_spaces();
        if !self.at_arrow() {
            return Err(self.error("expected '=>'"));
        }
        self.pos += 2;
        self.skip_spaces();
        let replacement = self.replacement(tree)?;
        Ok((pattern, replacement))
    }

    fn alternation(&mut self, tree: &mut Tree) -> ParseResult<NodeId> {
        let mut branches = vec![self.sequence(tree)?];
        while self.peek() == Some('|') {
            self.pos += 1;
            branches.push(self.sequence(tree)?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            tree.push(Node::Alt(branches))
        })
    }

    fn sequence(&mut self, tree: &mut Tree) -> ParseResult<NodeId> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                None | Some('|') | Some(')') | Some('>') => break,
                Some(' ') | Some('\t') if self.ahead_is_arrow_or_end() => break,
                Some('=') if self.at_arrow() => break,
                _ => {}
            }
            let atom = self.atom(tree)?;
            items.push(self.quantified(tree, atom));
        }
        if items.is_empty() {
            return Err(self.error("empty pattern"));
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            tree.push(Node::Seq(items))
        })
    }

    /// Trailing spaces before `=>` or end-of-line are separators, interior
    /// spaces are literal symbols.
    fn ahead_is_arrow_or_end(&self) -> bool {
        let mut i = self.pos;
        while matches!(self.chars.get(i), Some(' ') | Some('\t')) {
            i += 1;
        }
        i >= self.chars.len()
            || (self.chars.get(i) == Some(&'=') && self.chars.get(i + 1) == Some(&'>'))
    }

    fn quantified(&mut self, tree: &mut Tree, atom: NodeId) -> NodeId {
        match self.peek() {
            Some('*') => {
                self.pos += 1;
                tree.push(Node::Repeat {
                    body: atom,
                    min: 0,
                    max: None,
                })
            }
            Some('+') => {
                self.pos += 1;
                tree.push(Node::Repeat {
                    body: atom,
                    min: 1,
                    max: None,
                })
            }
            Some('?') => {
                self.pos += 1;
                tree.push(Node::Repeat {
                    body: atom,
                    min: 0,
                    max: Some(1),
                })
            }
            _ => atom,
        }
    }

    fn atom(&mut self, tree: &mut Tree) -> ParseResult<NodeId> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.alternation(tree)?;
                if self.bump() != Some(')') {
                    return Err(self.error("unclosed group"));
                }
                Ok(inner)
            }
            Some('[') => self.class(tree),
            Some('<') => self.capture(tree),
            Some('$') => {
                self.pos += 1;
                let name = self.name()?;
                Ok(tree.push(Node::BackRef(name)))
            }
            Some('.') => {
                self.pos += 1;
                Ok(tree.push(Node::Any))
            }
            Some('\\') => {
                self.pos += 1;
                match self.bump() {
                    Some('z') => Ok(tree.push(Node::EndAnchor)),
                    Some(c) => Ok(tree.push(Node::Item(Symbol::Char(unescape(c))))),
                    None => Err(self.error("dangling escape")),
                }
            }
            Some(c) if "*+?|)]>".contains(c) => {
                Err(self.error(format!("unexpected '{c}'")))
            }
            Some(c) => {
                self.pos += 1;
                Ok(tree.push(Node::Item(Symbol::Char(c))))
            }
            None => Err(self.error("unexpected end of pattern")),
        }
    }

    fn class(&mut self, tree: &mut Tree) -> ParseResult<NodeId> {
        self.pos += 1; // '['
        let negated = if self.peek() == Some('^') {
            self.pos += 1;
            true
        } else {
            false
        };
        let mut set = BTreeSet::new();
        loop {
            match self.bump() {
                Some(']') => break,
                Some('\\') => match self.bump() {
                    Some(c) => {
                        set.insert(Symbol::Char(unescape(c)));
                    }
                    None => return Err(self.error("dangling escape in class")),
                },
                Some(c) => {
                    set.insert(Symbol::Char(c));
                }
                None => return Err(self.error("unclosed class")),
            }
        }
        if set.is_empty() {
            return Err(self.error("empty class"));
        }
        Ok(tree.push(Node::Class { negated, set }))
    }

    fn capture(&mut self, tree: &mut Tree) -> ParseResult<NodeId> {
        self.pos += 1; // '<'
        let name = self.name()?;
        if self.bump() != Some(':') {
            return Err(self.error("expected ':' in capture"));
        }
        let body = self.alternation(tree)?;
        if self.bump() != Some('>') {
            return Err(self.error("unclosed capture"));
        }
        Ok(tree.push(Node::Capture { name, body }))
    }

    fn name(&mut self) -> ParseResult<String> {
        let mut name = String::new();
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                name.push(c);
                self.pos += 1;
            }
            _ => return Err(self.error("expected a name")),
        }
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn replacement(&mut self, tree: &mut Tree) -> ParseResult<NodeId> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        // Escaped characters are never trimmed; `kept` marks the end of
        // the last one.
        let mut kept = 0;
        while let Some(c) = self.bump() {
            match c {
                '$' => {
                    if !lit.is_empty() {
                        parts.push(tree.push(Node::Lit(std::mem::take(&mut lit))));
                        kept = 0;
                    }
                    let name = self.name()?;
                    parts.push(tree.push(Node::VarRef(name)));
                }
                '\\' => match self.bump() {
                    Some(e) => {
                        lit.push(unescape(e));
                        kept = lit.len();
                    }
                    None => return Err(self.error("dangling escape in replacement")),
                },
                c => lit.push(c),
            }
        }
        // Raw trailing whitespace on the line is not part of the output.
        while lit.len() > kept && (lit.ends_with(' ') || lit.ends_with('\t')) {
            lit.pop();
        }
        if !lit.is_empty() {
            parts.push(tree.push(Node::Lit(lit)));
        }
        Ok(match parts.len() {
            0 => tree.push(Node::Lit(String::new())),
            1 => parts.remove(0),
            _ => tree.push(Node::ReplSeq(parts)),
        })
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '0' => '\0',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_rule() {
        let set = parse_rules("a => b").unwrap();
        assert_eq!(set.rules.len(), 1);
        let (pattern, replacement) = set.rules[0];
        assert_eq!(set.tree.node(pattern), &Node::Item(Symbol::Char('a')));
        assert_eq!(set.tree.node(replacement), &Node::Lit("b".into()));
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let set = parse_rules("# comment\n\na => b\n").unwrap();
        assert_eq!(set.rules.len(), 1);
    }

    #[test]
    fn test_parse_alternation_and_quantifiers() {
        let set = parse_rules("a|ab => 1").unwrap();
        let (pattern, _) = set.rules[0];
        assert!(matches!(set.tree.node(pattern), Node::Alt(branches) if branches.len() == 2));

        let set = parse_rules("a+b? => x").unwrap();
        let (pattern, _) = set.rules[0];
        let Node::Seq(items) = set.tree.node(pattern) else {
            panic!("expected Seq");
        };
        assert!(matches!(
            set.tree.node(items[0]),
            Node::Repeat { min: 1, max: None, .. }
        ));
        assert!(matches!(
            set.tree.node(items[1]),
            Node::Repeat { min: 0, max: Some(1), .. }
        ));
    }

    #[test]
    fn test_parse_class() {
        let set = parse_rules("[abc] => x").unwrap();
        let (pattern, _) = set.rules[0];
        let Node::Class { negated, set: syms } = set.tree.node(pattern) else {
            panic!("expected Class");
        };
        assert!(!negated);
        assert_eq!(syms.len(), 3);

        let set = parse_rules("[^ab] => x").unwrap();
        let (pattern, _) = set.rules[0];
        assert!(matches!(set.tree.node(pattern), Node::Class { negated: true, .. }));
    }

    #[test]
    fn test_parse_capture_and_varref() {
        let set = parse_rules("<x:[ab]+> => $x$x").unwrap();
        let (pattern, replacement) = set.rules[0];
        assert!(matches!(set.tree.node(pattern), Node::Capture { name, .. } if name == "x"));
        let Node::ReplSeq(parts) = set.tree.node(replacement) else {
            panic!("expected ReplSeq");
        };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_parse_backref_and_anchor() {
        let set = parse_rules("<x:.>$x\\z => y").unwrap();
        let (pattern, _) = set.rules[0];
        let Node::Seq(items) = set.tree.node(pattern) else {
            panic!("expected Seq");
        };
        assert!(matches!(set.tree.node(items[1]), Node::BackRef(n) if n == "x"));
        assert_eq!(set.tree.node(items[2]), &Node::EndAnchor);
    }

    #[test]
    fn test_parse_escapes() {
        let set = parse_rules("\\n\\\\ => \\t").unwrap();
        let (pattern, replacement) = set.rules[0];
        let Node::Seq(items) = set.tree.node(pattern) else {
            panic!("expected Seq");
        };
        assert_eq!(set.tree.node(items[0]), &Node::Item(Symbol::Char('\n')));
        assert_eq!(set.tree.node(items[1]), &Node::Item(Symbol::Char('\\')));
        assert_eq!(set.tree.node(replacement), &Node::Lit("\t".into()));
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = parse_rules("a => b\n[ab => c").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unclosed class"));

        let err = parse_rules("a").unwrap_err();
        assert!(err.message.contains("expected '=>'"));

        assert!(parse_rules("").is_err());
        assert!(parse_rules(" => b").is_err());
    }

    #[test]
    fn test_interior_space_is_literal() {
        let set = parse_rules("a b => c").unwrap();
        let (pattern, _) = set.rules[0];
        let Node::Seq(items) = set.tree.node(pattern) else {
            panic!("expected Seq");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(set.tree.node(items[1]), &Node::Item(Symbol::Char(' ')));
    }

    #[test]
    fn test_escaped_trailing_whitespace_survives_trimming() {
        let set = parse_rules("a => x\\t").unwrap();
        let (_, replacement) = set.rules[0];
        assert_eq!(set.tree.node(replacement), &Node::Lit("x\t".into()));

        let set = parse_rules("a => x\\ \t ").unwrap();
        let (_, replacement) = set.rules[0];
        assert_eq!(set.tree.node(replacement), &Node::Lit("x ".into()));

        let set = parse_rules("a => x\tz  ").unwrap();
        let (_, replacement) = set.rules[0];
        assert_eq!(set.tree.node(replacement), &Node::Lit("x\tz".into()));
    }

    #[test]
    fn test_empty_replacement_is_allowed() {
        let set = parse_rules("a =>").unwrap();
        let (_, replacement) = set.rules[0];
        assert_eq!(set.tree.node(replacement), &Node::Lit(String::new()));
    }
}
