use crate::ast::{CompareOp, Expr, PropRef, RuleAst, ScheduleExpr, TimeExpr, Value};
use crate::lexer::{Lexer, Token, TokenKind};
use smart_core::ParseError;

/// 规则文本解析器
///
/// ```text
/// rule := object ':' [schedule '|'] condition '|' cmdlet
/// ```
pub struct RuleParser<'a> {
    text: &'a str,
    lexer: Lexer<'a>,
    lookahead: Option<Token>,
    last_end: usize,
}

impl<'a> RuleParser<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            lexer: Lexer::new(text),
            lookahead: None,
            last_end: 0,
        }
    }

    pub fn parse(text: &'a str) -> Result<RuleAst, ParseError> {
        RuleParser::new(text).rule()
    }

    fn peek(&mut self) -> Result<&Token, ParseError> {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token()?);
        }
        match &self.lookahead {
            Some(token) => Ok(token),
            None => Err(ParseError::new("Unexpected end of rule", self.text.len())),
        }
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let token = match self.lookahead.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        self.last_end = token.end;
        Ok(token)
    }

    fn unexpected(&self, token: &Token, expected: &str) -> ParseError {
        let found = match &token.kind {
            TokenKind::Eof => "end of rule".to_string(),
            _ => format!("'{}'", &self.text[token.start..token.end]),
        };
        ParseError::new(
            format!("Expected {} but found {} at {}", expected, found, token.start),
            token.start,
        )
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        let token = self.advance()?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(self.unexpected(&token, expected))
        }
    }

    fn peek_keyword(&mut self, keyword: &str) -> Result<bool, ParseError> {
        Ok(self.peek()?.is_keyword(keyword))
    }

    fn rule(&mut self) -> Result<RuleAst, ParseError> {
        let object = self.ident("object name")?;
        if object != "file" {
            return Err(ParseError::new(format!("Unknown object '{}'", object), 0));
        }
        self.expect(TokenKind::Colon, "':'")?;

        let schedule = if self.peek_keyword("every")? || self.peek_keyword("at")? {
            let schedule = self.schedule()?;
            self.expect(TokenKind::Pipe, "'|'")?;
            Some(schedule)
        } else {
            None
        };

        let cond_start = self.peek()?.start;
        let condition = self.or_expr()?;
        let cond_end = self.last_end;

        // 管道之后的内容原样交给 cmdlet 解析器
        let pipe = self.expect(TokenKind::Pipe, "'|'")?;
        let cmdlet = self.text[pipe.end..].trim().to_string();

        Ok(RuleAst {
            object,
            schedule,
            condition,
            cond_span: (cond_start, cond_end),
            cmdlet,
        })
    }

    fn ident(&mut self, expected: &str) -> Result<String, ParseError> {
        let token = self.advance()?;
        match token.kind {
            TokenKind::Ident(name) => Ok(name),
            _ => Err(self.unexpected(&token, expected)),
        }
    }

    fn schedule(&mut self) -> Result<ScheduleExpr, ParseError> {
        let keyword = self.ident("'every' or 'at'")?;
        if keyword == "at" {
            return Ok(ScheduleExpr::At(self.time_expr()?));
        }

        let token = self.advance()?;
        let every = match token.kind {
            TokenKind::Duration(ms) => ms,
            _ => return Err(self.unexpected(&token, "time interval")),
        };
        if every <= 0 {
            return Err(ParseError::new("Schedule interval must be positive", token.start));
        }

        let from = if self.peek_keyword("from")? {
            self.advance()?;
            Some(self.time_expr()?)
        } else {
            None
        };
        let to = if self.peek_keyword("to")? {
            self.advance()?;
            Some(self.time_expr()?)
        } else {
            None
        };
        Ok(ScheduleExpr::Every { every, from, to })
    }

    fn time_expr(&mut self) -> Result<TimeExpr, ParseError> {
        let token = self.advance()?;
        match token.kind {
            TokenKind::Str(s) => Ok(TimeExpr::Absolute(s)),
            TokenKind::Ident(ref name) if name == "now" => Ok(TimeExpr::Now(self.now_offset()?)),
            _ => Err(self.unexpected(&token, "time expression")),
        }
    }

    /// `now` 之后可选的 `+ d` / `- d`
    fn now_offset(&mut self) -> Result<i64, ParseError> {
        let sign = match self.peek()?.kind {
            TokenKind::Plus => 1,
            TokenKind::Minus => -1,
            _ => return Ok(0),
        };
        self.advance()?;
        let token = self.advance()?;
        match token.kind {
            TokenKind::Duration(ms) => Ok(sign * ms),
            _ => Err(self.unexpected(&token, "time interval")),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.peek_keyword("or")? {
            self.advance()?;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.peek_keyword("and")? {
            self.advance()?;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.peek_keyword("not")? {
            self.advance()?;
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        if self.peek()?.kind == TokenKind::LParen {
            self.advance()?;
            let expr = self.or_expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(expr);
        }
        if let TokenKind::Integer(value) = self.peek()?.kind {
            self.advance()?;
            return Ok(Expr::Constant(value));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expr, ParseError> {
        let prop = self.prop_ref()?;

        if self.peek_keyword("matches")? {
            self.advance()?;
            let token = self.advance()?;
            return match token.kind {
                TokenKind::Str(pattern) => Ok(Expr::Matches { prop, pattern }),
                _ => Err(self.unexpected(&token, "string pattern")),
            };
        }

        let op = match self.peek()?.kind {
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            _ => return Ok(Expr::Flag(prop)),
        };
        self.advance()?;
        let value = self.value()?;
        Ok(Expr::Compare { prop, op, value })
    }

    fn prop_ref(&mut self) -> Result<PropRef, ParseError> {
        let position = self.peek()?.start;
        let mut name = self.ident("property")?;
        if name == "file" && self.peek()?.kind == TokenKind::Dot {
            self.advance()?;
            name = self.ident("property")?;
        }

        let mut args = Vec::new();
        if self.peek()?.kind == TokenKind::LParen {
            self.advance()?;
            if self.peek()?.kind != TokenKind::RParen {
                args.push(self.value()?);
                while self.peek()?.kind == TokenKind::Comma {
                    self.advance()?;
                    args.push(self.value()?);
                }
            }
            self.expect(TokenKind::RParen, "')'")?;
        }
        Ok(PropRef {
            name,
            args,
            position,
        })
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        let token = self.advance()?;
        match token.kind {
            TokenKind::Integer(v) | TokenKind::Duration(v) | TokenKind::Size(v) => Ok(Value::Long(v)),
            TokenKind::Str(s) => Ok(Value::Str(s)),
            TokenKind::Ident(ref name) if name == "now" => Ok(Value::Now(self.now_offset()?)),
            _ => Err(self.unexpected(&token, "value")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(name: &str, position: usize) -> PropRef {
        PropRef {
            name: name.to_string(),
            args: vec![],
            position,
        }
    }

    #[test]
    fn test_parse_simple_rule() {
        let text = "file: path matches \"/src/*\" and length > 1MB | cache";
        let ast = RuleParser::parse(text).unwrap();
        assert_eq!(ast.object, "file");
        assert!(ast.schedule.is_none());
        assert_eq!(ast.cmdlet, "cache");
        assert_eq!(
            &text[ast.cond_span.0..ast.cond_span.1],
            "path matches \"/src/*\" and length > 1MB"
        );
        assert_eq!(
            ast.condition,
            Expr::And(
                Box::new(Expr::Matches {
                    prop: prop("path", 6),
                    pattern: "/src/*".to_string()
                }),
                Box::new(Expr::Compare {
                    prop: prop("length", 32),
                    op: CompareOp::Gt,
                    value: Value::Long(1024 * 1024)
                })
            )
        );
    }

    #[test]
    fn test_parse_schedule_and_precedence() {
        let text = "file: every 5s from now to now + 1h | not isDir or owner == \"hdfs\" and file.age > 1d | echo -msg hi";
        let ast = RuleParser::parse(text).unwrap();
        assert_eq!(
            ast.schedule,
            Some(ScheduleExpr::Every {
                every: 5000,
                from: Some(TimeExpr::Now(0)),
                to: Some(TimeExpr::Now(3_600_000)),
            })
        );
        match ast.condition {
            Expr::Or(left, right) => {
                assert!(matches!(*left, Expr::Not(_)));
                assert!(matches!(*right, Expr::And(_, _)));
            }
            other => panic!("unexpected condition {:?}", other),
        }
        assert_eq!(ast.cmdlet, "echo -msg hi");
    }

    #[test]
    fn test_parse_property_arguments() {
        let ast = RuleParser::parse("file: at now | accessCountTop(10min, 5) | cache").unwrap();
        assert_eq!(ast.schedule, Some(ScheduleExpr::At(TimeExpr::Now(0))));
        assert_eq!(
            ast.condition,
            Expr::Flag(PropRef {
                name: "accessCountTop".to_string(),
                args: vec![Value::Long(600_000), Value::Long(5)],
                position: 15,
            })
        );
    }

    #[test]
    fn test_cmdlet_is_not_tokenized() {
        let ast = RuleParser::parse("file: length > 0 | sync -dest /backup/ ; echo -msg \"a b\"").unwrap();
        assert_eq!(ast.cmdlet, "sync -dest /backup/ ; echo -msg \"a b\"");
    }

    #[test]
    fn test_parse_errors() {
        let err = RuleParser::parse("dir: length > 0 | cache").unwrap_err();
        assert!(err.message.contains("Unknown object"));

        let err = RuleParser::parse("file: length > | cache").unwrap_err();
        assert!(err.message.contains("Expected value"));

        let err = RuleParser::parse("file: (length > 0 | cache").unwrap_err();
        assert!(err.message.contains("Expected ')'"));

        let err = RuleParser::parse("file: length > 0").unwrap_err();
        assert!(err.message.contains("end of rule"));
    }
}
