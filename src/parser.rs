use crate::error::{Span, SyntaxError};
use crate::lexer::{Spanned, Token};

/// A parsed candidate program: a flat list of statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `name = expr` or `obj[key] = expr`.
    Assign(Expr, Expr),
    /// `name += expr` and friends.
    AugAssign(Expr, BinOp, Expr),
    Expr(Expr),
    Pass,
    /// `import module [as alias]`.
    Import { module: String, alias: Option<String> },
    /// `from module import name [as alias], …`.
    FromImport { module: String, names: Vec<(String, Option<String>)> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attr(Box<Expr>, String),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Subscript(Box<Expr>, Box<Expr>),
    /// `start:stop:step`; only valid inside a subscript.
    Slice(Option<Box<Expr>>, Option<Box<Expr>>, Option<Box<Expr>>),
    BinOp(Box<Expr>, BinOp, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    /// A comparison chain: `a < b <= c`.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }

    fn from_augmented(op: &str) -> Option<BinOp> {
        Some(match op {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Mod,
            "//" => BinOp::FloorDiv,
            "**" => BinOp::Pow,
            "&" => BinOp::BitAnd,
            "|" => BinOp::BitOr,
            "^" => BinOp::BitXor,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

/// Lex and parse a whole program.
pub fn parse_program(src: &str) -> Result<Program, SyntaxError> {
    let tokens = crate::lexer::Lexer::new(src).tokenize()?;
    Parser::new(tokens).parse()
}

/// Lex and parse a single expression (used by `DataFrame.query`).
pub fn parse_expression(src: &str) -> Result<Expr, SyntaxError> {
    let tokens = crate::lexer::Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.skip_terminators();
    let expr = parser.parse_expr()?;
    parser.skip_terminators();
    if !parser.at_eof() {
        return Err(parser.error(format!("unexpected {}", describe(parser.current()))));
    }
    Ok(expr)
}

/// Deepest expression tree the parser builds. Evaluation and analysis
/// recurse over the tree, so this bounds their stack use as well.
pub const MAX_DEPTH: usize = 100;

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0, depth: 0 }
    }

    pub fn parse(&mut self) -> Result<Program, SyntaxError> {
        let mut statements = Vec::new();
        self.skip_terminators();
        while !self.at_eof() {
            statements.push(self.parse_statement()?);
            if !self.is_terminator() {
                return Err(self.error(format!("unexpected {}", describe(self.current()))));
            }
            self.skip_terminators();
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.span();
        let kind = match self.current().clone() {
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Import => {
                self.advance();
                let module = self.parse_dotted_name()?;
                let alias = self.parse_alias()?;
                StmtKind::Import { module, alias }
            }
            Token::From => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.expect(&Token::Import)?;
                let mut names = Vec::new();
                loop {
                    let name = self.expect_ident()?;
                    let alias = self.parse_alias()?;
                    names.push((name, alias));
                    if !self.check(&Token::Comma) {
                        break;
                    }
                    self.advance();
                }
                StmtKind::FromImport { module, names }
            }
            Token::Reserved(word) => {
                return Err(self.error(format!("'{}' statements are not supported", word)));
            }
            Token::If => {
                return Err(self.error("'if' statements are not supported; use a conditional expression"));
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt { kind, span })
    }

    fn parse_expression_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let target = self.parse_expr_list()?;

        if self.check(&Token::Assign) {
            self.advance();
            self.check_target(&target)?;
            let value = self.parse_expr_list()?;
            if self.check(&Token::Assign) {
                return Err(self.error("chained assignment is not supported"));
            }
            return Ok(StmtKind::Assign(target, value));
        }

        if let Token::AugAssign(op) = self.current().clone() {
            let op = BinOp::from_augmented(&op)
                .ok_or_else(|| self.error(format!("unsupported operator '{}='", op)))?;
            self.advance();
            self.check_target(&target)?;
            let value = self.parse_expr_list()?;
            return Ok(StmtKind::AugAssign(target, op, value));
        }

        Ok(StmtKind::Expr(target))
    }

    fn check_target(&self, target: &Expr) -> Result<(), SyntaxError> {
        match target {
            Expr::Name(_) | Expr::Subscript(..) => Ok(()),
            Expr::Attr(..) => Err(self.error("assignment to attributes is not supported")),
            Expr::Tuple(_) => Err(self.error("tuple unpacking is not supported")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn parse_dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_ident()?;
        while self.check(&Token::Dot) {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    fn parse_alias(&mut self) -> Result<Option<String>, SyntaxError> {
        if self.check(&Token::As) {
            self.advance();
            return self.expect_ident().map(Some);
        }
        Ok(None)
    }

    /// `a, b` at statement level builds a tuple.
    fn parse_expr_list(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.parse_expr()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.advance();
            if self.is_terminator() || self.check(&Token::Assign) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    pub fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.descend()?;
        let expr = self.parse_ternary()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_ternary(&mut self) -> Result<Expr, SyntaxError> {
        let then = self.parse_logical_or()?;
        if !self.check(&Token::If) {
            return Ok(then);
        }
        self.advance();
        let cond = self.parse_logical_or()?;
        self.expect(&Token::Else)?;
        self.descend()?;
        let otherwise = self.parse_ternary()?;
        self.depth -= 1;
        Ok(Expr::IfElse {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_logical_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_logical_and()?;
        let mut folds = 0;

        while self.check(&Token::Or) {
            self.advance();
            self.descend()?;
            folds += 1;
            let right = self.parse_logical_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }

        self.depth -= folds;
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_logical_not()?;
        let mut folds = 0;

        while self.check(&Token::And) {
            self.advance();
            self.descend()?;
            folds += 1;
            let right = self.parse_logical_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }

        self.depth -= folds;
        Ok(left)
    }

    fn parse_logical_not(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&Token::Not) {
            self.advance();
            self.descend()?;
            let expr = self.parse_logical_not()?;
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(expr)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.parse_bitor()?;
        let mut chain = Vec::new();

        loop {
            let op = match self.current() {
                Token::Eq => CmpOp::Eq,
                Token::Ne => CmpOp::Ne,
                Token::Lt => CmpOp::Lt,
                Token::Le => CmpOp::Le,
                Token::Gt => CmpOp::Gt,
                Token::Ge => CmpOp::Ge,
                Token::In => CmpOp::In,
                Token::Is => {
                    if self.peek_is(1, &Token::Not) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                Token::Not if self.peek_is(1, &Token::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            chain.push((op, self.parse_bitor()?));
        }

        if chain.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), chain))
        }
    }

    fn parse_bitor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_bitxor()?;
        let mut folds = 0;
        while self.check(&Token::Pipe) {
            self.advance();
            self.descend()?;
            folds += 1;
            let right = self.parse_bitxor()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitOr, Box::new(right));
        }
        self.depth -= folds;
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_bitand()?;
        let mut folds = 0;
        while self.check(&Token::Caret) {
            self.advance();
            self.descend()?;
            folds += 1;
            let right = self.parse_bitand()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitXor, Box::new(right));
        }
        self.depth -= folds;
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_addition()?;
        let mut folds = 0;
        while self.check(&Token::Amp) {
            self.advance();
            self.descend()?;
            folds += 1;
            let right = self.parse_addition()?;
            left = Expr::BinOp(Box::new(left), BinOp::BitAnd, Box::new(right));
        }
        self.depth -= folds;
        Ok(left)
    }

    fn parse_addition(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_multiplication()?;
        let mut folds = 0;

        loop {
            let op = match self.current() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend()?;
            folds += 1;
            let right = self.parse_multiplication()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }

        self.depth -= folds;
        Ok(left)
    }

    fn parse_multiplication(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        let mut folds = 0;

        loop {
            let op = match self.current() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                Token::At => return Err(self.error("matrix multiplication is not supported")),
                _ => break,
            };
            self.advance();
            self.descend()?;
            folds += 1;
            let right = self.parse_unary()?;
            left = Expr::BinOp(Box::new(left), op, Box::new(right));
        }

        self.depth -= folds;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.current() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            Token::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.advance();
        self.descend()?;
        let expr = self.parse_unary()?;
        self.depth -= 1;
        // Fold negative literals so `-1` stays a constant.
        if let (UnaryOp::Neg, Expr::Number(n)) = (op, &expr) {
            return Ok(Expr::Number(-n));
        }
        Ok(Expr::Unary(op, Box::new(expr)))
    }

    /// `**` binds tighter than unary minus on its left and is right-associative.
    fn parse_power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_postfix()?;
        if self.check(&Token::DoubleStar) {
            self.advance();
            self.descend()?;
            let exponent = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::BinOp(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        let mut folds = 0;

        loop {
            if matches!(self.current(), Token::Dot | Token::LParen | Token::LBracket) {
                self.descend()?;
                folds += 1;
            }
            match self.current() {
                Token::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = Expr::Attr(Box::new(expr), name);
                }
                Token::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call { func: Box::new(expr), args, kwargs };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Subscript(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }

        self.depth -= folds;
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.check(&Token::RParen) {
            if matches!(self.current(), Token::Star | Token::DoubleStar) {
                return Err(self.error("argument unpacking is not supported"));
            }
            if let Token::Ident(name) = self.current().clone()
                && self.peek_is(1, &Token::Assign)
            {
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.parse_expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.parse_expr()?);
            }
            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&Token::RParen)?;
        Ok((args, kwargs))
    }

    /// Subscript contents: a single item, a slice, or a comma-separated tuple of them.
    fn parse_subscript(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.parse_subscript_item()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.advance();
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_subscript_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_subscript_item(&mut self) -> Result<Expr, SyntaxError> {
        let start = if self.check(&Token::Colon) { None } else { Some(self.parse_expr()?) };
        if !self.check(&Token::Colon) {
            return start.ok_or_else(|| self.error("expected subscript"));
        }
        self.advance();
        let stop = self.parse_slice_bound()?;
        let step = if self.check(&Token::Colon) {
            self.advance();
            self.parse_slice_bound()?
        } else {
            None
        };
        Ok(Expr::Slice(start.map(Box::new), stop.map(Box::new), step.map(Box::new)))
    }

    fn parse_slice_bound(&mut self) -> Result<Option<Expr>, SyntaxError> {
        if matches!(self.current(), Token::Colon | Token::Comma | Token::RBracket) {
            Ok(None)
        } else {
            self.parse_expr().map(Some)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.current().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::StringLit(s) => {
                self.advance();
                // Adjacent literals concatenate.
                let mut s = s;
                while let Token::StringLit(next) = self.current().clone() {
                    self.advance();
                    s.push_str(&next);
                }
                Ok(Expr::Str(s))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::None => {
                self.advance();
                Ok(Expr::None)
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            Token::LParen => {
                self.advance();
                if self.check(&Token::RParen) {
                    self.advance();
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.check(&Token::RParen) {
                    self.advance();
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.check(&Token::Comma) {
                    self.advance();
                    if self.check(&Token::RParen) {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::Tuple(items))
            }
            Token::LBracket => {
                self.advance();
                let items = self.parse_sequence(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                while !self.check(&Token::RBrace) {
                    let key = self.parse_expr()?;
                    if !self.check(&Token::Colon) {
                        return Err(self.error("set literals are not supported"));
                    }
                    self.advance();
                    let value = self.parse_expr()?;
                    pairs.push((key, value));
                    if !self.check(&Token::Comma) {
                        break;
                    }
                    self.advance();
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Dict(pairs))
            }
            Token::Reserved(word) if word == "lambda" => Err(self.error("lambda expressions are not supported")),
            _ => Err(self.error(format!("unexpected {}", describe(self.current())))),
        }
    }

    fn parse_sequence(&mut self, close: &Token) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expr()?);
            if matches!(self.current(), Token::Reserved(w) if w == "for") {
                return Err(self.error("comprehensions are not supported"));
            }
            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(close)?;
        Ok(items)
    }

    // --- helpers ---

    /// Enter one more level of the expression tree. Callers undo it
    /// on success; a failed parse is abandoned whole.
    fn descend(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nested more than {} levels deep", MAX_DEPTH)));
        }
        Ok(())
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn peek_is(&self, offset: usize, token: &Token) -> bool {
        self.tokens
            .get(self.pos + offset)
            .is_some_and(|t| std::mem::discriminant(&t.token) == std::mem::discriminant(token))
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(Span::new(1, 1), |t| t.span)
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.span(), message)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token) -> Result<(), SyntaxError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}, got {}", describe(token), describe(self.current()))))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        if let Token::Ident(name) = self.current().clone() {
            self.advance();
            Ok(name)
        } else {
            Err(self.error(format!("expected a name, got {}", describe(self.current()))))
        }
    }

    fn is_terminator(&self) -> bool {
        matches!(self.current(), Token::Semicolon | Token::Newline | Token::Eof)
    }

    fn skip_terminators(&mut self) {
        while matches!(self.current(), Token::Semicolon | Token::Newline) {
            self.advance();
        }
    }
}

/// Human-readable token name for error messages.
fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::StringLit(_) => "string".to_string(),
        Token::Ident(name) => format!("name '{}'", name),
        Token::Reserved(word) => format!("keyword '{}'", word),
        Token::Newline => "end of line".to_string(),
        Token::Eof => "end of input".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::LBrace => "'{'".to_string(),
        Token::RBrace => "'}'".to_string(),
        Token::Colon => "':'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Assign => "'='".to_string(),
        Token::Import => "'import'".to_string(),
        Token::Else => "'else'".to_string(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> StmtKind {
        let mut program = parse_program(src).unwrap();
        assert_eq!(program.statements.len(), 1);
        program.statements.remove(0).kind
    }

    fn expr(src: &str) -> Expr {
        parse_expression(src).unwrap()
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.into()))
    }

    // ── Statements ──────────────────────────────────────────────

    #[test]
    fn assignment() {
        assert_eq!(
            parse_one("filtered_df = df"),
            StmtKind::Assign(Expr::Name("filtered_df".into()), Expr::Name("df".into()))
        );
    }

    #[test]
    fn column_assignment() {
        let StmtKind::Assign(Expr::Subscript(obj, key), _) = parse_one("df['x'] = 1") else {
            panic!("expected subscript assignment");
        };
        assert_eq!(obj, name("df"));
        assert_eq!(*key, Expr::Str("x".into()));
    }

    #[test]
    fn imports() {
        assert_eq!(
            parse_one("import pandas as pd"),
            StmtKind::Import { module: "pandas".into(), alias: Some("pd".into()) }
        );
        assert_eq!(
            parse_one("import os.path"),
            StmtKind::Import { module: "os.path".into(), alias: None }
        );
        assert_eq!(
            parse_one("from pandas import DataFrame as F"),
            StmtKind::FromImport {
                module: "pandas".into(),
                names: vec![("DataFrame".into(), Some("F".into()))],
            }
        );
    }

    #[test]
    fn augmented_assignment() {
        assert!(matches!(parse_one("x **= 2"), StmtKind::AugAssign(_, BinOp::Pow, _)));
        assert!(matches!(parse_one("x ^= 2"), StmtKind::AugAssign(_, BinOp::BitXor, _)));
    }

    #[test]
    fn multiple_statements_and_semicolons() {
        let program = parse_program("a = 1; b = 2\n\nc = a + b\n").unwrap();
        assert_eq!(program.statements.len(), 3);
        assert_eq!(program.statements[2].span.line, 3);
    }

    #[test]
    fn unsupported_statements() {
        assert!(parse_program("for x in y: pass").is_err());
        assert!(parse_program("def f(): pass").is_err());
        assert!(parse_program("if x: pass").is_err());
        assert!(parse_program("a.b = 1").is_err());
        assert!(parse_program("1 = a").is_err());
    }

    // ── Expressions ─────────────────────────────────────────────

    #[test]
    fn method_chain_with_kwargs() {
        let e = expr("df.sort_values('Sales', ascending=False).head(5)");
        let Expr::Call { func, args, kwargs } = e else { panic!("expected call") };
        assert_eq!(args, vec![Expr::Number(5.0)]);
        assert!(kwargs.is_empty());
        let Expr::Attr(inner, method) = *func else { panic!("expected attribute") };
        assert_eq!(method, "head");
        let Expr::Call { kwargs, .. } = *inner else { panic!("expected inner call") };
        assert_eq!(kwargs, vec![("ascending".to_string(), Expr::Bool(false))]);
    }

    #[test]
    fn boolean_mask_precedence() {
        // `&` binds tighter than `>`, so masks need parentheses, as in Python.
        let e = expr("(df['a'] > 1) & (df['b'] < 2)");
        assert!(matches!(e, Expr::BinOp(_, BinOp::BitAnd, _)));
    }

    #[test]
    fn not_binds_looser_than_comparison() {
        let e = expr("not a == b");
        let Expr::Unary(UnaryOp::Not, inner) = e else { panic!("expected not") };
        assert!(matches!(*inner, Expr::Compare(..)));
    }

    #[test]
    fn comparison_chain_and_membership() {
        let Expr::Compare(_, chain) = expr("1 < x <= 3") else { panic!() };
        assert_eq!(chain.iter().map(|(op, _)| *op).collect::<Vec<_>>(), vec![CmpOp::Lt, CmpOp::Le]);
        let Expr::Compare(_, chain) = expr("x not in [1, 2]") else { panic!() };
        assert_eq!(chain[0].0, CmpOp::NotIn);
        let Expr::Compare(_, chain) = expr("x is not None") else { panic!() };
        assert_eq!(chain[0], (CmpOp::IsNot, Expr::None));
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        assert_eq!(
            expr("-2 ** 2"),
            Expr::Unary(
                UnaryOp::Neg,
                Box::new(Expr::BinOp(Box::new(Expr::Number(2.0)), BinOp::Pow, Box::new(Expr::Number(2.0))))
            )
        );
        let Expr::BinOp(_, BinOp::Pow, rhs) = expr("2 ** 3 ** 2") else { panic!() };
        assert!(matches!(*rhs, Expr::BinOp(_, BinOp::Pow, _)));
    }

    #[test]
    fn slices_and_tuples_in_subscripts() {
        let Expr::Subscript(_, idx) = expr("df.iloc[1:3]") else { panic!() };
        assert_eq!(
            *idx,
            Expr::Slice(Some(Box::new(Expr::Number(1.0))), Some(Box::new(Expr::Number(3.0))), None)
        );
        let Expr::Subscript(_, idx) = expr("df.loc[:, ['a', 'b']]") else { panic!() };
        let Expr::Tuple(items) = *idx else { panic!() };
        assert_eq!(items[0], Expr::Slice(None, None, None));
    }

    #[test]
    fn containers() {
        assert_eq!(expr("()"), Expr::Tuple(vec![]));
        assert_eq!(expr("(1,)"), Expr::Tuple(vec![Expr::Number(1.0)]));
        assert_eq!(expr("[1, 2,]"), Expr::List(vec![Expr::Number(1.0), Expr::Number(2.0)]));
        assert_eq!(
            expr("{'a': 'sum'}"),
            Expr::Dict(vec![(Expr::Str("a".into()), Expr::Str("sum".into()))])
        );
    }

    #[test]
    fn conditional_expression() {
        assert!(matches!(expr("1 if x else 2"), Expr::IfElse { .. }));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        assert_eq!(expr("'a' 'b'"), Expr::Str("ab".into()));
    }

    #[test]
    fn lambdas_and_comprehensions_are_rejected() {
        assert!(parse_expression("lambda x: x").is_err());
        assert!(parse_expression("[x for x in y]").is_err());
    }

    #[test]
    fn nesting_depth_is_capped() {
        let deep = format!("x = {}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let err = parse_program(&deep).unwrap_err();
        assert!(err.message.contains("nested more than"), "{}", err.message);
        assert_eq!(err.span.line, 1);

        let shallow = format!("x = {}1{}", "(".repeat(40), ")".repeat(40));
        assert!(parse_program(&shallow).is_ok());
    }

    #[test]
    fn long_operator_chains_count_towards_depth() {
        let chain = format!("x = 1{}", " + 1".repeat(MAX_DEPTH * 2));
        assert!(parse_program(&chain).is_err());
        assert!(parse_program(&format!("x = df{}", ".a".repeat(MAX_DEPTH * 2))).is_err());
        assert!(parse_expression(&format!("{}x", "not ".repeat(MAX_DEPTH * 2))).is_err());
        assert!(parse_program("x = df[(df['a'] > 1) & (df['b'] < 2) & df['c'].isin([1, 2])]").is_ok());
    }

    #[test]
    fn error_carries_location() {
        let err = parse_program("a = 1\nb = (2 +\n").unwrap_err();
        assert_eq!(err.span.line, 3);
    }
}
