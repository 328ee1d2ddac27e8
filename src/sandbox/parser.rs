use super::SandboxError;
use super::lexer::{Tok, Token, tokenize, unescape};

/// Deepest expression tree a snippet may build. Evaluation recurses over
/// the tree, so this also bounds the evaluator's stack use.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    None,
    FStr(Vec<FPart>),
    Name(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Attr(Box<Expr>, String),
    Call(Box<Expr>, Vec<Arg>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Lit(String),
    /// Placeholder expression with an optional format spec (`.2f`, `.1%`).
    Expr(Expr, Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

/// Things that can appear left of `=`. Indexed and attribute targets must
/// hang off a plain name.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index(String, Expr),
    Attr(String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign(Target, Expr),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub stmt: Stmt,
    pub line: usize,
}

pub fn parse_program(src: &str) -> Result<Vec<Line>, SandboxError> {
    Parser::new(tokenize(src)?, 0).program()
}

fn parse_expression(src: &str, line: usize, depth: usize) -> Result<Expr, SandboxError> {
    let mut tokens = tokenize(src).map_err(|e| match e {
        SandboxError::Syntax { message, .. } => SandboxError::Syntax { line, message },
        other => other,
    })?;
    for t in &mut tokens {
        t.line = line;
    }
    let mut p = Parser::new(tokens, depth);
    let expr = p.expr()?;
    p.skip_newlines();
    if !p.at(&Tok::Eof) {
        return Err(p.error("unexpected input in f-string placeholder"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Tree depth of the node being parsed. Each operator in a chain counts
    /// as a level since it wraps everything to its left.
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self { tokens, pos: 0, depth }
    }

    fn descend(&mut self) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(&format!("expression nested more than {MAX_DEPTH} levels deep")));
        }
        Ok(())
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if name == kw)
    }

    fn bump(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), SandboxError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}, found {}", describe(self.peek()))))
        }
    }

    fn error(&self, message: &str) -> SandboxError {
        SandboxError::Syntax {
            line: self.line(),
            message: message.to_string(),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Tok::Newline) {}
    }

    fn program(&mut self) -> Result<Vec<Line>, SandboxError> {
        let mut lines = Vec::new();
        self.skip_newlines();
        while !self.at(&Tok::Eof) {
            let line = self.line();
            let stmt = self.statement()?;
            lines.push(Line { stmt, line });
            if !self.at(&Tok::Eof) {
                self.expect(&Tok::Newline, "end of statement")?;
            }
            self.skip_newlines();
        }
        Ok(lines)
    }

    fn statement(&mut self) -> Result<Stmt, SandboxError> {
        let expr = self.expr()?;
        if !self.eat(&Tok::Assign) {
            return Ok(Stmt::Expr(expr));
        }
        let target = match expr {
            Expr::Name(name) => Target::Name(name),
            Expr::Index(object, key) => match *object {
                Expr::Name(name) => Target::Index(name, *key),
                _ => return Err(self.error("can only assign into a named frame or map")),
            },
            Expr::Attr(object, attr) => match *object {
                Expr::Name(name) => Target::Attr(name, attr),
                _ => return Err(self.error("can only assign attributes of a named frame")),
            },
            _ => return Err(self.error("cannot assign to this expression")),
        };
        let value = self.expr()?;
        Ok(Stmt::Assign(target, value))
    }

    fn expr(&mut self) -> Result<Expr, SandboxError> {
        let outer = self.depth;
        let expr = self.descend().and_then(|()| self.or_expr());
        self.depth = outer;
        expr
    }

    fn or_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.and_expr()?;
        while self.at_keyword("or") {
            self.bump();
            self.descend()?;
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.not_expr()?;
        while self.at_keyword("and") {
            self.bump();
            self.descend()?;
            let rhs = self.not_expr()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, SandboxError> {
        if self.at_keyword("not") {
            self.bump();
            self.descend()?;
            let inner = self.not_expr()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let lhs = self.bit_or()?;
        let op = match self.peek() {
            Tok::Lt => BinOp::Lt,
            Tok::Le => BinOp::Le,
            Tok::Gt => BinOp::Gt,
            Tok::Ge => BinOp::Ge,
            Tok::EqEq => BinOp::Eq,
            Tok::Ne => BinOp::Ne,
            _ => return Ok(lhs),
        };
        self.bump();
        self.descend()?;
        let rhs = self.bit_or()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn bit_or(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.bit_and()?;
        while self.eat(&Tok::Pipe) {
            self.descend()?;
            let rhs = self.bit_and()?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn bit_and(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.additive()?;
        while self.eat(&Tok::Amp) {
            self.descend()?;
            let rhs = self.additive()?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            self.descend()?;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.bump();
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Tilde => UnaryOp::Invert,
            Tok::Plus => {
                self.bump();
                self.descend()?;
                return self.unary();
            }
            _ => return self.power(),
        };
        self.bump();
        self.descend()?;
        let inner = self.unary()?;
        Ok(Expr::Unary(op, Box::new(inner)))
    }

    fn power(&mut self) -> Result<Expr, SandboxError> {
        let base = self.postfix()?;
        if self.eat(&Tok::StarStar) {
            self.descend()?;
            // Right-associative and binds tighter than unary minus on its left.
            let exp = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.primary()?;
        loop {
            if matches!(self.peek(), Tok::Dot | Tok::LBracket | Tok::LParen) {
                self.descend()?;
            }
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    match self.bump() {
                        Tok::Ident(name) => expr = Expr::Attr(Box::new(expr), name),
                        other => {
                            return Err(self.error(&format!(
                                "expected attribute name after '.', found {}",
                                describe(&other)
                            )));
                        }
                    }
                }
                Tok::LBracket => {
                    self.bump();
                    let key = self.expr()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(key));
                }
                Tok::LParen => {
                    self.bump();
                    let args = self.arguments()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Arg>, SandboxError> {
        let mut args = Vec::new();
        while !self.at(&Tok::RParen) {
            let name = match (self.peek(), self.tokens.get(self.pos + 1).map(|t| &t.tok)) {
                (Tok::Ident(name), Some(Tok::Assign)) => {
                    let name = name.clone();
                    self.bump();
                    self.bump();
                    Some(name)
                }
                _ => None,
            };
            let value = self.expr()?;
            if name.is_none() && args.iter().any(|a: &Arg| a.name.is_some()) {
                return Err(self.error("positional argument after keyword argument"));
            }
            args.push(Arg { name, value });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        match self.bump() {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => {
                // Adjacent literals concatenate.
                let mut s = s;
                while let Tok::Str(next) = self.peek().clone() {
                    self.bump();
                    s.push_str(&next);
                }
                Ok(Expr::Str(s))
            }
            Tok::FStr(body) => Ok(Expr::FStr(parse_fstring(&body, line, self.depth)?)),
            Tok::Ident(name) => Ok(match name.as_str() {
                "true" | "True" => Expr::Bool(true),
                "false" | "False" => Expr::Bool(false),
                "none" | "None" => Expr::None,
                "and" | "or" | "not" => {
                    return Err(self.error(&format!("unexpected keyword '{name}'")));
                }
                _ => Expr::Name(name),
            }),
            Tok::LParen => {
                let inner = self.expr()?;
                if self.eat(&Tok::Comma) {
                    // Tuples read as lists.
                    let mut items = vec![inner];
                    while !self.at(&Tok::RParen) {
                        items.push(self.expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::RParen, "')'")?;
                    return Ok(Expr::List(items));
                }
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                while !self.at(&Tok::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                let mut pairs = Vec::new();
                while !self.at(&Tok::RBrace) {
                    let key = self.expr()?;
                    self.expect(&Tok::Colon, "':' in map literal")?;
                    let value = self.expr()?;
                    pairs.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace, "'}'")?;
                Ok(Expr::Map(pairs))
            }
            other => Err(SandboxError::Syntax {
                line,
                message: format!("unexpected {}", describe(&other)),
            }),
        }
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(n) => format!("number {n}"),
        Tok::Str(_) | Tok::FStr(_) => "string".into(),
        Tok::Ident(name) => format!("'{name}'"),
        Tok::Newline => "end of line".into(),
        Tok::Eof => "end of input".into(),
        other => format!("{other:?}"),
    }
}

/// Split an f-string body into literal text and `{expr[:spec]}` placeholders.
fn parse_fstring(body: &str, line: usize, depth: usize) -> Result<Vec<FPart>, SandboxError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut i = 0;

    let syntax = |message: &str| SandboxError::Syntax {
        line,
        message: message.to_string(),
    };

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                lit.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                lit.push('}');
                i += 2;
            }
            '{' => {
                if !lit.is_empty() {
                    parts.push(FPart::Lit(unescape(&lit)));
                    lit.clear();
                }
                let start = i + 1;
                let mut depth = 0usize;
                let mut quote: Option<char> = None;
                let mut colon: Option<usize> = None;
                let mut j = start;
                while j < chars.len() {
                    let c = chars[j];
                    match quote {
                        Some(q) if c == q => quote = None,
                        Some(_) => {}
                        None => match c {
                            '"' | '\'' => quote = Some(c),
                            '(' | '[' | '{' => depth += 1,
                            ')' | ']' => depth = depth.saturating_sub(1),
                            '}' if depth == 0 => break,
                            '}' => depth -= 1,
                            ':' if depth == 0 => colon = Some(j),
                            _ => {}
                        },
                    }
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(syntax("unclosed '{' in f-string"));
                }
                let expr_end = colon.unwrap_or(j);
                let src: String = chars[start..expr_end].iter().collect();
                if src.trim().is_empty() {
                    return Err(syntax("empty placeholder in f-string"));
                }
                let spec = colon.map(|c| chars[c + 1..j].iter().collect::<String>());
                parts.push(FPart::Expr(parse_expression(&src, line, depth)?, spec));
                i = j + 1;
            }
            '}' => return Err(syntax("single '}' in f-string")),
            c => {
                lit.push(c);
                i += 1;
            }
        }
    }
    if !lit.is_empty() {
        parts.push(FPart::Lit(unescape(&lit)));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(src: &str) -> Stmt {
        let mut lines = parse_program(src).unwrap();
        assert_eq!(lines.len(), 1);
        lines.remove(0).stmt
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.into()))
    }

    #[test]
    fn column_assignment_target() {
        match one("df['ret'] = df.close.pct_change()") {
            Stmt::Assign(Target::Index(n, Expr::Str(col)), Expr::Call(..)) => {
                assert_eq!(n, "df");
                assert_eq!(col, "ret");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(one("df.sma = 1"), Stmt::Assign(Target::Attr(..), _)));
    }

    #[test]
    fn precedence_follows_arithmetic_rules() {
        assert_eq!(
            one("1 + 2 * 3"),
            Stmt::Expr(Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Num(1.0)),
                Box::new(Expr::Binary(BinOp::Mul, Box::new(Expr::Num(2.0)), Box::new(Expr::Num(3.0))))
            ))
        );
        // Unary minus binds looser than power.
        assert_eq!(
            one("-2 ** 2"),
            Stmt::Expr(Expr::Unary(
                UnaryOp::Neg,
                Box::new(Expr::Binary(BinOp::Pow, Box::new(Expr::Num(2.0)), Box::new(Expr::Num(2.0))))
            ))
        );
    }

    #[test]
    fn mask_expression_groups_comparisons() {
        let stmt = one("(df.rsi < 30) & (df.close > df.ema)");
        assert!(matches!(stmt, Stmt::Expr(Expr::Binary(BinOp::BitAnd, _, _))));
        let stmt = one("a < 1 and not b");
        assert!(matches!(stmt, Stmt::Expr(Expr::Binary(BinOp::And, _, _))));
    }

    #[test]
    fn keyword_arguments() {
        match one("ta.macd(df.close, fast=12, slow=26)") {
            Stmt::Expr(Expr::Call(callee, args)) => {
                assert_eq!(*callee, Expr::Attr(name("ta"), "macd".into()));
                assert_eq!(args.len(), 3);
                assert_eq!(args[1].name.as_deref(), Some("fast"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_program("f(a=1, 2)").is_err());
    }

    #[test]
    fn literals() {
        assert!(matches!(one("[1, 'a', true, None]"), Stmt::Expr(Expr::List(items)) if items.len() == 4));
        assert!(matches!(one("{'a': 1, 'b': [2]}"), Stmt::Expr(Expr::Map(pairs)) if pairs.len() == 2));
        assert!(matches!(one("(1, 2)"), Stmt::Expr(Expr::List(items)) if items.len() == 2));
    }

    #[test]
    fn fstring_parts_and_specs() {
        match one(r#"f"close={df.close.last():.2f} {{x}}""#) {
            Stmt::Expr(Expr::FStr(parts)) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], FPart::Lit("close=".into()));
                assert!(matches!(&parts[1], FPart::Expr(Expr::Call(..), Some(spec)) if spec == ".2f"));
                assert_eq!(parts[2], FPart::Lit(" {x}".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn multiple_statements_keep_line_numbers() {
        let lines = parse_program("x = 1\n\n# note\ny = x + 1").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, 4);
    }

    #[test]
    fn invalid_targets_and_trailing_tokens() {
        assert!(parse_program("1 = 2").is_err());
        assert!(parse_program("f(x)[0] = 1").is_err());
        assert!(parse_program("x = 1 2").is_err());
        let err = parse_program("x = (1 +").unwrap_err();
        assert!(err.to_string().starts_with("syntax error on line 1"));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        let err = parse_program(&deep).unwrap_err();
        assert!(err.to_string().contains("nested more than 64 levels"));

        assert!(parse_program(&format!("x = {}1", "-".repeat(1000))).is_err());
        assert!(parse_program(&format!("x = 1{}", " + 1".repeat(1000))).is_err());
        assert!(parse_program(&format!("x = df{}", ".a".repeat(1000))).is_err());
        assert!(parse_program(&format!("x = {}1{}", "[".repeat(1000), "]".repeat(1000))).is_err());

        let fine = format!("x = {}1{} + 2 * 3", "(".repeat(20), ")".repeat(20));
        assert!(parse_program(&fine).is_ok());
    }
}
