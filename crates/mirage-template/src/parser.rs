//! Template parser.
//!
//! Template text is scanned character by character; wherever a reference
//! (`$...`) or a directive argument list (`#if(...)`) appears, its extent is
//! cut out, tokenized by the [`Lexer`](crate::lexer::Lexer) and parsed as an
//! expression.

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, Node, Reference, Segment, UnaryOp};
use crate::lexer::{is_ident_char, is_ident_start, Lexer, Token, TokenKind};

/// Byte offset and message of a syntax error.
pub(crate) type SyntaxError = (usize, String);

type PResult<T> = Result<T, SyntaxError>;

/// Parse a whole template into nodes.
pub(crate) fn parse_template(source: &str) -> PResult<Vec<Node>> {
    TemplateParser::new(source, 0).parse_all()
}

/// What ended a block of nodes.
enum Stop {
    Eof,
    ElseIf(Expr, usize),
    Else(usize),
    End(usize),
}

struct TemplateParser<'a> {
    source: &'a str,
    pos: usize,
    /// Offset of `source` within the outermost template.
    base: usize,
}

impl<'a> TemplateParser<'a> {
    fn new(source: &'a str, base: usize) -> Self {
        TemplateParser {
            source,
            pos: 0,
            base,
        }
    }

    fn parse_all(&mut self) -> PResult<Vec<Node>> {
        let (nodes, stop) = self.parse_block()?;
        match stop {
            Stop::Eof => Ok(nodes),
            Stop::ElseIf(_, at) => Err((at, "#elseif without #if".into())),
            Stop::Else(at) => Err((at, "#else without #if".into())),
            Stop::End(at) => Err((at, "#end without a matching directive".into())),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn offset(&self, local: usize) -> usize {
        self.base + local
    }

    fn parse_block(&mut self) -> PResult<(Vec<Node>, Stop)> {
        let mut nodes = Vec::new();
        let mut text = String::new();

        let flush = |nodes: &mut Vec<Node>, text: &mut String| {
            if !text.is_empty() {
                nodes.push(Node::Text(std::mem::take(text)));
            }
        };

        while let Some(ch) = self.rest().chars().next() {
            if ch == '#' {
                if self.rest().starts_with("##") {
                    let len = self.rest().find('\n').unwrap_or(self.rest().len());
                    self.pos += len;
                    continue;
                }
                if self.rest().starts_with("#*") {
                    let start = self.pos;
                    let len = self.rest()[2..]
                        .find("*#")
                        .ok_or_else(|| (self.offset(start), "unterminated #* comment".to_string()))?;
                    self.pos += len + 4;
                    continue;
                }
                if let Some((name, name_len)) = self.directive_name() {
                    let start = self.pos;
                    match name {
                        "set" | "if" | "foreach" => {
                            flush(&mut nodes, &mut text);
                            self.pos += name_len;
                            let node = match name {
                                "set" => self.parse_set(start)?,
                                "if" => self.parse_if(start)?,
                                _ => self.parse_foreach(start)?,
                            };
                            nodes.push(node);
                            continue;
                        }
                        "elseif" => {
                            flush(&mut nodes, &mut text);
                            self.pos += name_len;
                            let condition = self.parse_arguments(start, parse_expression)?;
                            return Ok((nodes, Stop::ElseIf(condition, self.offset(start))));
                        }
                        "else" => {
                            flush(&mut nodes, &mut text);
                            self.pos += name_len;
                            return Ok((nodes, Stop::Else(self.offset(start))));
                        }
                        "end" => {
                            flush(&mut nodes, &mut text);
                            self.pos += name_len;
                            return Ok((nodes, Stop::End(self.offset(start))));
                        }
                        _ => {}
                    }
                }
            } else if ch == '$' {
                if let Some(len) = self.reference_extent() {
                    flush(&mut nodes, &mut text);
                    let start = self.pos;
                    let extent = &self.source[start..start + len];
                    let reference = parse_reference_text(extent, self.offset(start))?;
                    nodes.push(Node::Reference(reference));
                    self.pos += len;
                    continue;
                }
            }
            text.push(ch);
            self.pos += ch.len_utf8();
        }

        flush(&mut nodes, &mut text);
        Ok((nodes, Stop::Eof))
    }

    /// Recognize `#name` or `#{name}` for a known directive. Returns the name
    /// and the byte length of the directive token.
    fn directive_name(&self) -> Option<(&'static str, usize)> {
        const DIRECTIVES: &[&str] = &["set", "if", "elseif", "else", "end", "foreach"];
        let after = &self.rest()[1..];
        let (word, len) = if let Some(braced) = after.strip_prefix('{') {
            let close = braced.find('}')?;
            (&braced[..close], close + 3)
        } else {
            let word_len = after
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(after.len());
            (&after[..word_len], word_len + 1)
        };
        DIRECTIVES
            .iter()
            .find(|d| **d == word)
            .map(|d| (*d, len))
    }

    /// Byte length of the reference starting at the current `$`, if any.
    fn reference_extent(&self) -> Option<usize> {
        let rest = self.rest();
        let mut len = 1;
        if rest[len..].starts_with('!') {
            len += 1;
        }
        if rest[len..].starts_with('{') {
            if !rest[len + 1..].starts_with(is_ident_start) {
                return None;
            }
            let close = find_closing(rest, len)?;
            return Some(close + 1);
        }
        if !rest[len..].starts_with(is_ident_start) {
            return None;
        }
        len += ident_len(&rest[len..]);
        loop {
            let tail = &rest[len..];
            if tail.starts_with('.') && tail[1..].starts_with(is_ident_start) {
                len += 1 + ident_len(&tail[1..]);
                if rest[len..].starts_with('(') {
                    len = find_closing(rest, len)? + 1;
                }
            } else if tail.starts_with('[') {
                len = find_closing(rest, len)? + 1;
            } else {
                return Some(len);
            }
        }
    }

    /// Parse `( ... )` after a directive name with the given expression parser.
    fn parse_arguments<T>(
        &mut self,
        directive_start: usize,
        parse: fn(&mut ExprParser) -> PResult<T>,
    ) -> PResult<T> {
        let skipped = self.rest().len() - self.rest().trim_start_matches([' ', '\t']).len();
        self.pos += skipped;
        if !self.rest().starts_with('(') {
            return Err((self.offset(directive_start), "expected '(' after directive".into()));
        }
        let close = find_closing(self.source, self.pos)
            .ok_or_else(|| (self.offset(self.pos), "unbalanced parentheses".to_string()))?;
        let inner_start = self.pos + 1;
        let inner = &self.source[inner_start..close];
        self.pos = close + 1;

        let mut parser = ExprParser::new(inner, self.offset(inner_start))?;
        let value = parse(&mut parser)?;
        parser.expect_eof()?;
        Ok(value)
    }

    fn parse_set(&mut self, start: usize) -> PResult<Node> {
        let (target, value) = self.parse_arguments(start, |p| {
            let target = p.parse_reference()?;
            p.expect(TokenKind::Assign, "'=' in #set")?;
            let value = p.parse_expr()?;
            Ok((target, value))
        })?;
        if target
            .segments
            .iter()
            .any(|s| !matches!(s, Segment::Property(_)))
        {
            return Err((
                self.offset(start),
                "#set target must be a variable or property".into(),
            ));
        }
        Ok(Node::Set { target, value })
    }

    fn parse_if(&mut self, start: usize) -> PResult<Node> {
        let mut condition = self.parse_arguments(start, parse_expression)?;
        let mut branches = Vec::new();
        loop {
            let (body, stop) = self.parse_block()?;
            branches.push((condition, body));
            match stop {
                Stop::ElseIf(next, _) => condition = next,
                Stop::Else(_) => {
                    let (otherwise, stop) = self.parse_block()?;
                    return match stop {
                        Stop::End(_) => Ok(Node::If {
                            branches,
                            otherwise: Some(otherwise),
                        }),
                        Stop::Eof => Err((self.offset(start), "#if without #end".into())),
                        Stop::ElseIf(_, at) | Stop::Else(at) => {
                            Err((at, "unexpected directive after #else".into()))
                        }
                    };
                }
                Stop::End(_) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: None,
                    })
                }
                Stop::Eof => return Err((self.offset(start), "#if without #end".into())),
            }
        }
    }

    fn parse_foreach(&mut self, start: usize) -> PResult<Node> {
        let (variable, iterable) = self.parse_arguments(start, |p| {
            let at = p.current_offset();
            let variable = p.parse_reference()?;
            if !variable.segments.is_empty() {
                return Err((at, "#foreach variable must be a plain name".into()));
            }
            match p.advance().kind {
                TokenKind::Ident(ref word) if word == "in" => {}
                _ => return Err((at, "expected 'in' in #foreach".into())),
            }
            Ok((variable.root, p.parse_expr()?))
        })?;
        let (body, stop) = self.parse_block()?;
        match stop {
            Stop::End(_) => Ok(Node::Foreach {
                variable,
                iterable,
                body,
            }),
            Stop::Eof => Err((self.offset(start), "#foreach without #end".into())),
            Stop::ElseIf(_, at) | Stop::Else(at) => {
                Err((at, "#else inside #foreach".into()))
            }
        }
    }
}

fn parse_expression(parser: &mut ExprParser) -> PResult<Expr> {
    parser.parse_expr()
}

fn ident_len(text: &str) -> usize {
    text.find(|c: char| !is_ident_char(c)).unwrap_or(text.len())
}

/// Index of the bracket closing the one at `open`, skipping quoted strings.
fn find_closing(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let (open_ch, close_ch) = match bytes.get(open)? {
        b'(' => (b'(', b')'),
        b'[' => (b'[', b']'),
        b'{' => (b'{', b'}'),
        _ => return None,
    };
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&quote) {
                        i += 1;
                    }
                    i += 1;
                }
            }
            c if c == open_ch => depth += 1,
            c if c == close_ch => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn parse_reference_text(text: &str, base: usize) -> PResult<Reference> {
    let mut parser = ExprParser::new(text, base)?;
    let reference = parser.parse_reference()?;
    parser.expect_eof()?;
    Ok(reference)
}

pub(crate) struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
    base: usize,
}

impl ExprParser {
    fn new(text: &str, base: usize) -> PResult<Self> {
        let tokens = Lexer::new(text)
            .tokenize()
            .map_err(|(offset, reason)| (base + offset, reason))?;
        Ok(ExprParser {
            tokens,
            pos: 0,
            base,
        })
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn current_offset(&self) -> usize {
        self.base + self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err((self.current_offset(), format!("expected {}", what)))
        }
    }

    fn expect_eof(&mut self) -> PResult<()> {
        if matches!(self.peek(), TokenKind::Eof) {
            Ok(())
        } else {
            Err((
                self.current_offset(),
                format!("unexpected token {:?}", self.peek()),
            ))
        }
    }

    fn parse_reference(&mut self) -> PResult<Reference> {
        let at = self.current_offset();
        let (quiet, braced) = match self.advance().kind {
            TokenKind::Dollar { quiet, braced } => (quiet, braced),
            _ => return Err((at, "expected a $reference".into())),
        };
        let root = match self.advance().kind {
            TokenKind::Ident(name) => name,
            _ => return Err((at, "expected a name after '$'".into())),
        };
        let mut segments = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let name_at = self.current_offset();
                    let name = match self.advance().kind {
                        TokenKind::Ident(name) => name,
                        _ => return Err((name_at, "expected a name after '.'".into())),
                    };
                    if self.eat(&TokenKind::LParen) {
                        let args = self.parse_list_until(TokenKind::RParen, "')'")?;
                        segments.push(Segment::Method { name, args });
                    } else {
                        segments.push(Segment::Property(name));
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    segments.push(Segment::Index(index));
                }
                _ => break,
            }
        }
        if braced {
            self.expect(TokenKind::RBrace, "'}' closing ${")?;
        }
        Ok(Reference {
            quiet,
            root,
            segments,
        })
    }

    fn parse_list_until(&mut self, close: TokenKind, what: &str) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(close, what)?;
            return Ok(items);
        }
    }

    pub(crate) fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, level: usize) -> PResult<Expr> {
        const LEVELS: &[&[(TokenKind, BinaryOp)]] = &[
            &[(TokenKind::Or, BinaryOp::Or)],
            &[(TokenKind::And, BinaryOp::And)],
            &[(TokenKind::Eq, BinaryOp::Eq), (TokenKind::Ne, BinaryOp::Ne)],
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
        ];
        if level == LEVELS.len() {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(level + 1)?;
        'outer: loop {
            for (kind, op) in LEVELS[level] {
                if self.eat(kind) {
                    let right = self.parse_binary(level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.eat(&TokenKind::Not) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat(&TokenKind::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let at = self.current_offset();
        match self.peek().clone() {
            TokenKind::Dollar { .. } => return self.parse_reference().map(Expr::Reference),
            TokenKind::LBracket => {
                self.advance();
                return self.parse_list_or_range();
            }
            TokenKind::LBrace => {
                self.advance();
                return self.parse_map();
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            _ => {}
        }
        let expr = match self.advance().kind {
            TokenKind::Int(n) => Expr::Literal(Value::from(n)),
            TokenKind::Float(f) => Expr::Literal(Value::from(f)),
            TokenKind::Str(s) => Expr::Literal(Value::String(s)),
            TokenKind::InterpolatedStr(s) => interpolated(s, at)?,
            TokenKind::True => Expr::Literal(Value::Bool(true)),
            TokenKind::False => Expr::Literal(Value::Bool(false)),
            TokenKind::Null => Expr::Literal(Value::Null),
            other => return Err((at, format!("unexpected token {:?}", other))),
        };
        Ok(expr)
    }

    fn parse_list_or_range(&mut self) -> PResult<Expr> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.eat(&TokenKind::DotDot) {
            let last = self.parse_expr()?;
            self.expect(TokenKind::RBracket, "']' closing range")?;
            return Ok(Expr::Range(Box::new(first), Box::new(last)));
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            items.push(self.parse_expr()?);
        }
        self.expect(TokenKind::RBracket, "']' closing list")?;
        Ok(Expr::List(items))
    }

    fn parse_map(&mut self) -> PResult<Expr> {
        let mut entries = Vec::new();
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::Map(entries));
        }
        loop {
            let key = self.parse_expr()?;
            self.expect(TokenKind::Colon, "':' in map literal")?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RBrace, "'}' closing map")?;
            return Ok(Expr::Map(entries));
        }
    }
}

/// A double-quoted string is a template of its own when it contains `$` or `#`.
fn interpolated(text: String, at: usize) -> PResult<Expr> {
    if !text.contains(['$', '#']) {
        return Ok(Expr::Literal(Value::String(text)));
    }
    let nodes = TemplateParser::new(&text, at + 1).parse_all()?;
    match nodes.as_slice() {
        [] => Ok(Expr::Literal(Value::String(String::new()))),
        [Node::Text(only)] => Ok(Expr::Literal(Value::String(only.clone()))),
        _ => Ok(Expr::Interpolated(nodes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(root: &str, segments: Vec<Segment>) -> Reference {
        Reference {
            quiet: false,
            root: root.into(),
            segments,
        }
    }

    #[test]
    fn text_and_references() {
        let nodes = parse_template("id=$input.params('id');").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("id=".into()),
                Node::Reference(reference(
                    "input",
                    vec![Segment::Method {
                        name: "params".into(),
                        args: vec![Expr::Literal(json!("id"))],
                    }]
                )),
                Node::Text(";".into()),
            ]
        );
    }

    #[test]
    fn dollar_without_name_is_text() {
        let nodes = parse_template("costs $5 and $").unwrap();
        assert_eq!(nodes, vec![Node::Text("costs $5 and $".into())]);
    }

    #[test]
    fn trailing_dot_is_text() {
        let nodes = parse_template("$a.").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Reference(reference("a", vec![])), Node::Text(".".into())]
        );
    }

    #[test]
    fn braced_and_quiet_reference() {
        let nodes = parse_template("${a.b}c$!d").unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(
            nodes[0],
            Node::Reference(reference("a", vec![Segment::Property("b".into())]))
        );
        assert_eq!(nodes[1], Node::Text("c".into()));
        assert!(matches!(&nodes[2], Node::Reference(r) if r.quiet && r.root == "d"));
    }

    #[test]
    fn method_argument_with_closing_paren_in_string() {
        let nodes = parse_template("$input.json('$.a)')").unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn comments_are_dropped() {
        let nodes = parse_template("a## line\nb#* block *#c").unwrap();
        assert_eq!(nodes, vec![Node::Text("a\nbc".into())]);
    }

    #[test]
    fn if_elseif_else() {
        let nodes = parse_template("#if($a)x#elseif($b)y#{else}z#end").unwrap();
        let [Node::If {
            branches,
            otherwise,
        }] = nodes.as_slice()
        else {
            panic!("expected a single #if, got {:?}", nodes);
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[1].1, vec![Node::Text("y".into())]);
        assert_eq!(otherwise.as_deref(), Some(&[Node::Text("z".into())][..]));
    }

    #[test]
    fn foreach_over_range() {
        let nodes = parse_template("#foreach($i in [1..3])$i#end").unwrap();
        let [Node::Foreach {
            variable,
            iterable,
            body,
        }] = nodes.as_slice()
        else {
            panic!("expected a single #foreach");
        };
        assert_eq!(variable, "i");
        assert_eq!(
            iterable,
            &Expr::Range(
                Box::new(Expr::Literal(json!(1))),
                Box::new(Expr::Literal(json!(3)))
            )
        );
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn operator_precedence() {
        let mut parser = ExprParser::new("1 + 2 * 3 == 7 && !$x", 0).unwrap();
        let expr = parser.parse_expr().unwrap();
        let Expr::Binary(BinaryOp::And, left, right) = expr else {
            panic!("expected && at the top");
        };
        assert!(matches!(*left, Expr::Binary(BinaryOp::Eq, _, _)));
        assert!(matches!(*right, Expr::Unary(UnaryOp::Not, _)));
    }

    #[test]
    fn interpolated_string_literal() {
        let mut parser = ExprParser::new(r#""id-$id""#, 0).unwrap();
        assert!(matches!(parser.parse_expr().unwrap(), Expr::Interpolated(_)));
        let mut parser = ExprParser::new(r#""plain""#, 0).unwrap();
        assert_eq!(parser.parse_expr().unwrap(), Expr::Literal(json!("plain")));
    }

    #[test]
    fn set_target_must_be_assignable() {
        assert!(parse_template("#set($a.b = 1)").is_ok());
        assert!(parse_template("#set($a.b() = 1)").is_err());
    }

    #[test]
    fn unclosed_if_is_an_error() {
        let err = parse_template("ab#if($a)x").unwrap_err();
        assert_eq!(err.0, 2);
        assert!(err.1.contains("#end"));
    }

    #[test]
    fn stray_end_is_an_error() {
        assert!(parse_template("x#end").is_err());
    }

    #[test]
    fn unknown_directive_is_text() {
        let nodes = parse_template("#macro(x) #1").unwrap();
        assert_eq!(nodes, vec![Node::Text("#macro(x) #1".into())]);
    }
}
