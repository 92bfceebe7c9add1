//! Lexical analysis: source text to a token stream.
//!
//! The stream is produced in one pass and ends with an [`TokenKind::End`]
//! sentinel; the parser walks it with one token of lookahead and may rewind
//! to any saved position. Lines are counted from 1 and accept `\n`, `\r\n`
//! and `\r` terminators.

/// The closed set of token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Id,
    // keywords
    TypeChar,
    TypeDouble,
    Else,
    If,
    TypeInt,
    Return,
    Struct,
    Void,
    While,
    // punctuation
    Semicolon,
    Lpar,
    Rpar,
    Lbracket,
    Rbracket,
    Lacc,
    Racc,
    Comma,
    End,
    // operators
    Add,
    Sub,
    Mul,
    Div,
    Dot,
    And,
    Or,
    Not,
    Assign,
    Equal,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    // literals
    Int,
    Double,
    Char,
    Str,
}

/// Literal payload carried by `Id` and literal tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    /// Identifier or string contents.
    Text(String),
    Int(i64),
    Double(f64),
    Char(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub payload: Payload,
}

impl Token {
    fn new(kind: TokenKind, line: usize) -> Self {
        Token {
            kind,
            line,
            payload: Payload::None,
        }
    }
}

struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
}

/// Split source text into tokens, ending with the `END` sentinel.
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut lx = Lexer {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
        tokens: Vec::new(),
    };
    lx.run()?;
    Ok(lx.tokens)
}

impl<'s> Lexer<'s> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn add(&mut self, kind: TokenKind) {
        self.tokens.push(Token::new(kind, self.line));
    }

    fn run(&mut self) -> Result<(), String> {
        loop {
            let Some(c) = self.peek() else {
                self.add(TokenKind::End);
                return Ok(());
            };
            match c {
                b' ' | b'\t' => self.pos += 1,
                b'\r' => {
                    self.pos += 1;
                    if self.peek() == Some(b'\n') {
                        self.pos += 1;
                    }
                    self.line += 1;
                }
                b'\n' => {
                    self.pos += 1;
                    self.line += 1;
                }
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                b',' => self.single(TokenKind::Comma),
                b';' => self.single(TokenKind::Semicolon),
                b'(' => self.single(TokenKind::Lpar),
                b')' => self.single(TokenKind::Rpar),
                b'[' => self.single(TokenKind::Lbracket),
                b']' => self.single(TokenKind::Rbracket),
                b'{' => self.single(TokenKind::Lacc),
                b'}' => self.single(TokenKind::Racc),
                b'+' => self.single(TokenKind::Add),
                b'-' => self.single(TokenKind::Sub),
                b'*' => self.single(TokenKind::Mul),
                b'/' => self.single(TokenKind::Div),
                b'.' => self.single(TokenKind::Dot),
                b'=' => self.one_or_two(TokenKind::Assign, TokenKind::Equal),
                b'!' => self.one_or_two(TokenKind::Not, TokenKind::NotEq),
                b'<' => self.one_or_two(TokenKind::Less, TokenKind::LessEq),
                b'>' => self.one_or_two(TokenKind::Greater, TokenKind::GreaterEq),
                b'&' => self.double_only(b'&', TokenKind::And)?,
                b'|' => self.double_only(b'|', TokenKind::Or)?,
                b'\'' => self.char_literal()?,
                b'"' => self.string_literal()?,
                b'0'..=b'9' => self.number()?,
                c if c.is_ascii_alphabetic() || c == b'_' => self.word(),
                c => {
                    return Err(format!("Invalid char: {} ({})", c as char, c));
                }
            }
        }
    }

    fn single(&mut self, kind: TokenKind) {
        self.add(kind);
        self.pos += 1;
    }

    /// `=`-style operators: the bare kind, or the `..=` kind when a second
    /// `=` follows.
    fn one_or_two(&mut self, bare: TokenKind, with_eq: TokenKind) {
        if self.peek_at(1) == Some(b'=') {
            self.add(with_eq);
            self.pos += 2;
        } else {
            self.add(bare);
            self.pos += 1;
        }
    }

    /// `&&` and `||` require both characters.
    fn double_only(&mut self, c: u8, kind: TokenKind) -> Result<(), String> {
        if self.peek_at(1) == Some(c) {
            self.add(kind);
            self.pos += 2;
            Ok(())
        } else {
            Err(format!("Invalid char: {} ({})", c as char, c))
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' || c == b'\r' {
                break;
            }
            self.pos += 1;
        }
    }

    fn char_literal(&mut self) -> Result<(), String> {
        let (Some(c), Some(close)) = (self.peek_at(1), self.peek_at(2)) else {
            return Err(format!(
                "unterminated character literal at line {}",
                self.line
            ));
        };
        if c == b'\'' {
            return Err(format!("empty character literal at line {}", self.line));
        }
        if close != b'\'' || c == b'\n' || c == b'\r' {
            return Err(format!(
                "unterminated character literal at line {}",
                self.line
            ));
        }
        let mut tk = Token::new(TokenKind::Char, self.line);
        tk.payload = Payload::Char(c as char);
        self.tokens.push(tk);
        self.pos += 3;
        Ok(())
    }

    fn string_literal(&mut self) -> Result<(), String> {
        let start_line = self.line;
        let mut end = self.pos + 1;
        loop {
            match self.src.get(end) {
                None => {
                    return Err(format!("unterminated string literal at line {}", start_line));
                }
                Some(b'"') => break,
                Some(b'\n') => {
                    self.line += 1;
                    end += 1;
                }
                Some(_) => end += 1,
            }
        }
        let text = String::from_utf8_lossy(&self.src[self.pos + 1..end]).into_owned();
        let mut tk = Token::new(TokenKind::Str, start_line);
        tk.payload = Payload::Text(text);
        self.tokens.push(tk);
        self.pos = end + 1;
        Ok(())
    }

    /// Integer and double literals share a prefix; the longer span wins.
    /// A literal is a double only when the fraction and/or exponent extend
    /// the span beyond the plain digit run.
    fn number(&mut self) -> Result<(), String> {
        let start = self.pos;
        let mut end = start;
        while self.src.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
        let int_end = end;

        if self.src.get(end) == Some(&b'.') {
            end += 1;
            while self.src.get(end).is_some_and(u8::is_ascii_digit) {
                end += 1;
            }
        }
        if matches!(self.src.get(end), Some(b'e' | b'E')) {
            let mut exp = end + 1;
            if matches!(self.src.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            if self.src.get(exp).is_some_and(u8::is_ascii_digit) {
                while self.src.get(exp).is_some_and(u8::is_ascii_digit) {
                    exp += 1;
                }
                end = exp;
            }
        }

        let span = String::from_utf8_lossy(&self.src[start..end]).into_owned();
        let mut tk;
        if end > int_end {
            let value: f64 = span
                .parse()
                .map_err(|_| format!("invalid double literal {} at line {}", span, self.line))?;
            tk = Token::new(TokenKind::Double, self.line);
            tk.payload = Payload::Double(value);
        } else {
            let value: i64 = span
                .parse()
                .map_err(|_| format!("integer literal out of range at line {}", self.line))?;
            tk = Token::new(TokenKind::Int, self.line);
            tk.payload = Payload::Int(value);
        }
        self.tokens.push(tk);
        self.pos = end;
        Ok(())
    }

    fn word(&mut self) {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let kind = match text.as_str() {
            "char" => TokenKind::TypeChar,
            "double" => TokenKind::TypeDouble,
            "else" => TokenKind::Else,
            "if" => TokenKind::If,
            "int" => TokenKind::TypeInt,
            "return" => TokenKind::Return,
            "struct" => TokenKind::Struct,
            "void" => TokenKind::Void,
            "while" => TokenKind::While,
            _ => TokenKind::Id,
        };
        let mut tk = Token::new(kind, self.line);
        if kind == TokenKind::Id {
            tk.payload = Payload::Text(text);
        }
        self.tokens.push(tk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn empty_input_is_just_the_sentinel() {
        assert_eq!(kinds(""), vec![TokenKind::End]);
    }

    #[test]
    fn keywords_map_to_keyword_kinds_and_nothing_else() {
        use TokenKind::*;
        assert_eq!(
            kinds("char double else if int return struct void while"),
            vec![
                TypeChar, TypeDouble, Else, If, TypeInt, Return, Struct, Void, While, End
            ]
        );
        // near-keywords stay identifiers
        assert_eq!(kinds("ints Int returns _if"), vec![Id, Id, Id, Id, End]);
    }

    #[test]
    fn punctuators_map_uniquely() {
        use TokenKind::*;
        assert_eq!(
            kinds(", ; ( ) [ ] { } + - * / ."),
            vec![
                Comma, Semicolon, Lpar, Rpar, Lbracket, Rbracket, Lacc, Racc, Add, Sub, Mul, Div,
                Dot, End
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("= == ! != < <= > >= && ||"),
            vec![
                Assign, Equal, Not, NotEq, Less, LessEq, Greater, GreaterEq, And, Or, End
            ]
        );
    }

    #[test]
    fn lone_ampersand_is_invalid() {
        assert_eq!(tokenize("a & b").unwrap_err(), "Invalid char: & (38)");
        assert_eq!(tokenize("a | b").unwrap_err(), "Invalid char: | (124)");
    }

    #[test]
    fn unexpected_byte_reports_char_and_code() {
        assert_eq!(tokenize("int x; #").unwrap_err(), "Invalid char: # (35)");
    }

    #[test]
    fn int_literals_are_base_ten() {
        let tokens = tokenize("0 42 123").unwrap();
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Int(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![0, 42, 123]);
    }

    #[test]
    fn double_wins_only_on_a_longer_span() {
        assert_eq!(kinds("1"), vec![TokenKind::Int, TokenKind::End]);
        assert_eq!(kinds("1.5"), vec![TokenKind::Double, TokenKind::End]);
        assert_eq!(kinds("1."), vec![TokenKind::Double, TokenKind::End]);
        assert_eq!(kinds("1e3"), vec![TokenKind::Double, TokenKind::End]);
        assert_eq!(kinds("1.5e-2"), vec![TokenKind::Double, TokenKind::End]);
        // a dangling exponent is not consumed: int then identifier
        assert_eq!(kinds("1e"), vec![TokenKind::Int, TokenKind::Id, TokenKind::End]);
    }

    #[test]
    fn double_values_parse() {
        let tokens = tokenize("2.5 1e2").unwrap();
        let values: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t.payload {
                Payload::Double(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![2.5, 100.0]);
    }

    #[test]
    fn dot_without_exponent_digits_ends_the_literal() {
        // "1.e" has no exponent digits: the span "1." is a double and "e"
        // starts an identifier
        assert_eq!(
            kinds("1.e"),
            vec![TokenKind::Double, TokenKind::Id, TokenKind::End]
        );
    }

    #[test]
    fn char_literal_payload() {
        let tokens = tokenize("'a'").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Char);
        assert_eq!(tokens[0].payload, Payload::Char('a'));
    }

    #[test]
    fn char_literal_errors() {
        assert_eq!(
            tokenize("''").unwrap_err(),
            "empty character literal at line 1"
        );
        assert_eq!(
            tokenize("'ab'").unwrap_err(),
            "unterminated character literal at line 1"
        );
        assert_eq!(
            tokenize("'a").unwrap_err(),
            "unterminated character literal at line 1"
        );
    }

    #[test]
    fn string_literal_has_no_escape_processing() {
        let tokens = tokenize("\"he\\llo\"").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].payload, Payload::Text("he\\llo".to_string()));
    }

    #[test]
    fn unterminated_string_reports_its_opening_line() {
        assert_eq!(
            tokenize("\n\"abc").unwrap_err(),
            "unterminated string literal at line 2"
        );
    }

    #[test]
    fn line_comments_run_to_end_of_line() {
        assert_eq!(
            kinds("a // b c d\nb"),
            vec![TokenKind::Id, TokenKind::Id, TokenKind::End]
        );
    }

    #[test]
    fn lines_count_for_all_newline_conventions() {
        for (src, last_line) in [("a\nb\nc", 3), ("a\r\nb\r\nc", 3), ("a\rb\rc", 3)] {
            let tokens = tokenize(src).unwrap();
            assert_eq!(tokens[2].line, last_line, "source {:?}", src);
        }
    }

    #[test]
    fn token_round_trip_for_a_small_program() {
        use TokenKind::*;
        let source = "int f(int a) { return a + 1; }";
        assert_eq!(
            kinds(source),
            vec![
                TypeInt, Id, Lpar, TypeInt, Id, Rpar, Lacc, Return, Id, Add, Int, Semicolon, Racc,
                End
            ]
        );
    }
}
