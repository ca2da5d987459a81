//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("int")]
    Int,
    #[display("void")]
    Void,
    #[display("const")]
    Const,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("break")]
    Break,
    #[display("continue")]
    Continue,
    #[display("return")]
    Return,
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("==")]
    EqEq,
    #[display("!=")]
    Ne,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("=")]
    Assign,
    #[display("!")]
    Not,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(",")]
    Comma,
    #[display(";")]
    Semi,
}

#[derive(Display)]
#[display("Lexer error: unexpected character {_1:?} at {_0}")]
pub struct LexError(pub usize, pub char);

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;

        // Keywords carry a word-boundary so `intx` lexes as an identifier;
        // multi-character operators come before their one-character prefixes.
        let table: &[(&str, TokenKind)] = &[
            (r"\Aint\b", Int),
            (r"\Avoid\b", Void),
            (r"\Aconst\b", Const),
            (r"\Aif\b", If),
            (r"\Aelse\b", Else),
            (r"\Awhile\b", While),
            (r"\Abreak\b", Break),
            (r"\Acontinue\b", Continue),
            (r"\Areturn\b", Return),
            (r"\A[A-Za-z_][A-Za-z0-9_]*", Id),
            (r"\A(?:0[xX][0-9a-fA-F]+|[0-9]+)", Num),
            (r"\A<=", Le),
            (r"\A>=", Ge),
            (r"\A==", EqEq),
            (r"\A!=", Ne),
            (r"\A&&", AndAnd),
            (r"\A\|\|", OrOr),
            (r"\A<", Lt),
            (r"\A>", Gt),
            (r"\A=", Assign),
            (r"\A!", Not),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Mul),
            (r"\A/", Div),
            (r"\A%", Mod),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A\[", LBracket),
            (r"\A\]", RBracket),
            (r"\A,", Comma),
            (r"\A;", Semi),
        ];

        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(
                r"\A(?:[ \t\f\r\n\x0b]|//.*|/\*[^*]*\*+(?:[^/*][^*]*\*+)*/)*",
            )
            .unwrap(),
            matchers: table
                .iter()
                .map(|(re, kind)| (Regex::new(re).unwrap(), *kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = &rest[..m.end()];
                self.pos += m.end();
                return Ok(Some(Token { kind: *kind, text }));
            }
        }
        Err(LexError(self.pos, rest.chars().next().unwrap()))
    }

    /// Lex the whole input into a token vector.
    pub fn tokens(mut self) -> Result<Vec<Token<'input>>, LexError> {
        let mut out = Vec::new();
        while let Some(tok) = self.next()? {
            out.push(tok);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::TokenKind::*;
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokens()
            .unwrap()
            .iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("int main intx while1 return"),
            vec![Int, Id, Id, Id, Return]
        );
    }

    #[test]
    fn operators_longest_first() {
        assert_eq!(
            kinds("a <= b < c == d = e && f"),
            vec![Id, Le, Id, Lt, Id, EqEq, Id, Assign, Id, AndAnd, Id]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("x // line\n /* block\n * more */ y"),
            vec![Id, Id]
        );
    }

    #[test]
    fn numbers() {
        let toks = Lexer::new("0 42 0x1F 017").tokens().unwrap();
        let texts: Vec<_> = toks.iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["0", "42", "0x1F", "017"]);
        assert!(toks.iter().all(|t| t.kind == Num));
    }

    #[test]
    fn rejects_stray_characters() {
        let mut lexer = Lexer::new("a @ b");
        assert!(lexer.next().unwrap().is_some());
        assert!(lexer.next().is_err());
    }
}
