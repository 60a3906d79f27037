//! cmdlet 字符串解析
//!
//! 语法：`action1 [-option [value]] ... [; action2 [-option [value]] ...]`。
//! 值可以用双引号包裹以包含空白，`\` 转义下一个字符。

use crate::error::ParseError;
use std::collections::BTreeMap;

/// action 名称：字母开头，后接字母、数字或下划线
pub fn is_valid_action_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// 解析出的单个 action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    pub name: String,
    pub args: BTreeMap<String, String>,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCmdlet {
    pub cmdlet_string: String,
    pub actions: Vec<ParsedAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    InsideToken,
    InsideStrLiteral,
}

struct ParserContext {
    state: State,
    escaped: bool,
    token: String,
    tokens: Vec<String>,
    actions: Vec<ParsedAction>,
    position: usize,
}

impl ParserContext {
    fn new() -> Self {
        Self {
            state: State::Empty,
            escaped: false,
            token: String::new(),
            tokens: Vec::new(),
            actions: Vec::new(),
            position: 0,
        }
    }

    fn add_char(&mut self, ch: char) {
        self.token.push(ch);
    }

    fn token_ended(&mut self) {
        self.tokens.push(std::mem::take(&mut self.token));
        self.state = State::Empty;
        self.escaped = false;
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.position)
    }
}

/// cmdlet 解析器
#[derive(Debug, Default, Clone, Copy)]
pub struct CmdletParser;

impl CmdletParser {
    pub fn new() -> Self {
        Self
    }

    /// 解析 cmdlet 字符串，空白输入返回 `None`
    pub fn parse(&self, cmdlet: &str) -> Result<Option<ParsedCmdlet>, ParseError> {
        if cmdlet.trim().is_empty() {
            return Ok(None);
        }

        let mut ctx = ParserContext::new();
        // 追加一个空格，使最后一个 token 正常结束
        for (idx, ch) in cmdlet.chars().chain(std::iter::once(' ')).enumerate() {
            ctx.position = idx;
            match ch {
                ' ' | '\t' => Self::on_whitespace(&mut ctx, ch),
                ';' => Self::on_action_delimiter(&mut ctx)?,
                '"' => Self::on_quote(&mut ctx)?,
                '\n' | '\r' => Self::on_new_line(&mut ctx)?,
                '\\' if !ctx.escaped => ctx.escaped = true,
                _ => Self::on_token_char(&mut ctx, ch),
            }
        }

        if ctx.state == State::InsideStrLiteral {
            return Err(ctx.error("Unexpected break of string literal"));
        }
        if !ctx.tokens.is_empty() {
            Self::parse_action(&mut ctx)?;
        }

        Ok(Some(ParsedCmdlet {
            cmdlet_string: cmdlet.to_string(),
            actions: ctx.actions,
        }))
    }

    fn on_whitespace(ctx: &mut ParserContext, ch: char) {
        match ctx.state {
            State::InsideStrLiteral => ctx.add_char(ch),
            State::InsideToken => ctx.token_ended(),
            State::Empty => {}
        }
    }

    fn on_token_char(ctx: &mut ParserContext, ch: char) {
        if ctx.state != State::InsideStrLiteral {
            ctx.state = State::InsideToken;
        }
        ctx.escaped = false;
        ctx.add_char(ch);
    }

    fn on_action_delimiter(ctx: &mut ParserContext) -> Result<(), ParseError> {
        match ctx.state {
            State::InsideStrLiteral => {
                return Err(ctx.error("Unexpected break of string literal"));
            }
            State::InsideToken => ctx.token_ended(),
            State::Empty => {}
        }
        Self::parse_action(ctx)
    }

    fn on_quote(ctx: &mut ParserContext) -> Result<(), ParseError> {
        match ctx.state {
            State::InsideToken => return Err(ctx.error("Unexpected \"")),
            State::InsideStrLiteral => ctx.token_ended(),
            State::Empty => ctx.state = State::InsideStrLiteral,
        }
        Ok(())
    }

    fn on_new_line(ctx: &mut ParserContext) -> Result<(), ParseError> {
        match ctx.state {
            State::InsideToken => ctx.token_ended(),
            State::InsideStrLiteral => {
                return Err(ctx.error("Multiline string literals not supported"));
            }
            State::Empty => {}
        }
        Ok(())
    }

    fn parse_action(ctx: &mut ParserContext) -> Result<(), ParseError> {
        let mut tokens = std::mem::take(&mut ctx.tokens).into_iter();
        let name = tokens
            .next()
            .ok_or_else(|| ctx.error("Cmdlet should have at least one action"))?;

        if !is_valid_action_name(&name) {
            return Err(ctx.error(format!("Invalid action name: {}", name)));
        }

        let args = to_arg_map(tokens)?;
        ctx.actions.push(ParsedAction { name, args });
        Ok(())
    }
}

/// 将 `-key value -flag` 形式的 token 列表转换为参数表
pub fn to_arg_map<I>(args: I) -> Result<BTreeMap<String, String>, ParseError>
where
    I: IntoIterator<Item = String>,
{
    let mut map = BTreeMap::new();
    let mut last_key: Option<String> = None;

    for arg in args {
        if arg.starts_with('-') {
            map.insert(arg.clone(), String::new());
            last_key = Some(arg);
            continue;
        }
        match last_key.take() {
            Some(key) => {
                map.insert(key, arg);
            }
            None => {
                return Err(ParseError::new(
                    format!("Invalid action option format: '{}'", arg),
                    0,
                ));
            }
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse_err(input: &str) -> String {
        CmdletParser::new().parse(input).unwrap_err().message
    }

    #[test]
    fn test_empty_input() {
        let parser = CmdletParser::new();
        assert_eq!(parser.parse("").unwrap(), None);
        assert_eq!(parser.parse(" \t\n").unwrap(), None);
    }

    #[test]
    fn test_single_action() {
        let input = "action -key1 value1 -key2 \"value2\" -key3 \\/val3 -key4";
        let parsed = CmdletParser::new().parse(input).unwrap().unwrap();

        assert_eq!(parsed.cmdlet_string, input);
        assert_eq!(parsed.actions.len(), 1);
        assert_eq!(parsed.actions[0].name, "action");
        assert_eq!(
            parsed.actions[0].args,
            args(&[
                ("-key1", "value1"),
                ("-key2", "value2"),
                ("-key3", "/val3"),
                ("-key4", ""),
            ])
        );
    }

    #[test]
    fn test_multiple_actions() {
        let input = "action1 -key1 \"value1\" -key2; action2 -option withVal -option2 \\\\2 -withoutVal";
        let parsed = CmdletParser::new().parse(input).unwrap().unwrap();

        assert_eq!(parsed.actions.len(), 2);
        assert_eq!(
            parsed.actions[0].args,
            args(&[("-key1", "value1"), ("-key2", "")])
        );
        assert_eq!(parsed.actions[1].name, "action2");
        assert_eq!(
            parsed.actions[1].args,
            args(&[("-option", "withVal"), ("-option2", "\\2"), ("-withoutVal", "")])
        );
    }

    #[test]
    fn test_whitespaces() {
        let input = "action -key1     val1\t-key2\n \"\tval 2\" \r\n-key3";
        let parsed = CmdletParser::new().parse(input).unwrap().unwrap();

        assert_eq!(
            parsed.actions[0].args,
            args(&[("-key1", "val1"), ("-key2", "\tval 2"), ("-key3", "")])
        );
    }

    #[test]
    fn test_trailing_delimiter() {
        let parsed = tokio_test::assert_ok!(CmdletParser::new().parse("cache -file /a;"));
        assert_eq!(parsed.map(|p| p.actions.len()), Some(1));
        tokio_test::assert_err!(CmdletParser::new().parse(";"));
    }

    #[test]
    fn test_unfinished_string_literal() {
        assert_eq!(
            parse_err("buggy_action -key 1 -key2 \"str_literal"),
            "Unexpected break of string literal"
        );
        assert_eq!(
            parse_err("buggyAction -key2 \"str_literal; anotherAction -key val"),
            "Unexpected break of string literal"
        );
    }

    #[test]
    fn test_quote_inside_token() {
        assert_eq!(parse_err("action -key1 str_\"literal"), "Unexpected \"");
    }

    #[test]
    fn test_multiline_literal() {
        assert_eq!(
            parse_err("action_1 -key1 \"str\nliteral\""),
            "Multiline string literals not supported"
        );
    }

    #[test]
    fn test_invalid_option_format() {
        assert_eq!(parse_err("action val1"), "Invalid action option format: 'val1'");
        assert_eq!(
            parse_err("action -key val1 val2"),
            "Invalid action option format: 'val2'"
        );
    }

    #[test]
    fn test_invalid_action_name() {
        for name in ["1", "1action", "_action", "another-symbol", "another_symbol!", "another_s@mb0l"] {
            assert_eq!(parse_err(name), format!("Invalid action name: {}", name));
        }
    }

    #[test]
    fn test_empty_action_between_delimiters() {
        assert_eq!(
            parse_err("echo ; ; sleep"),
            "Cmdlet should have at least one action"
        );
    }
}
