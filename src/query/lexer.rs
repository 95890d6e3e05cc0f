//! §4.5 Lexer: tokenizes a query string into filter atoms, collection
//! names, operators, modifiers, and parentheses.
//!
//! Grounded on the original `mpdc/libs/parser.py`'s `ply.lex` rules
//! (`t_FILTER`, `t_COLLECTION`, the single-char operator tokens, and
//! `t_MODIFIER`); the scanning-priority rule it encodes (try FILTER before
//! a bareword, so `a"A"` lexes as one FILTER token rather than two
//! COLLECTION tokens) is reproduced by hand below instead of relying on a
//! regex-alternation engine.

use crate::error::{QueryError, QueryResult};

/// The thirteen letters the filter alphabet draws from — `a,b,t,n,g,d,c,
/// p,f,e,x,l,r` — before case folding. `r` is lexically valid but never a
/// known filter alias; it surfaces as `Filter [r] does not exist` at
/// evaluation time, exactly as in the source grammar.
const FILTER_ALPHABET: &[char] = &[
    'a', 'b', 't', 'n', 'g', 'd', 'c', 'p', 'f', 'e', 'x', 'l', 'r',
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Filter { alias: String, exact: bool, pattern: String },
    Modifier(String),
    Collection(String),
    Union,
    Intersection,
    Complement,
    SymDiff,
    LParen,
    RParen,
}

pub fn lex(input: &str) -> QueryResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    let mut tokens = Vec::new();

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        match c {
            '+' => {
                tokens.push(Token::Union);
                pos += 1;
                continue;
            }
            '.' => {
                tokens.push(Token::Intersection);
                pos += 1;
                continue;
            }
            '-' => {
                tokens.push(Token::Complement);
                pos += 1;
                continue;
            }
            '%' => {
                tokens.push(Token::SymDiff);
                pos += 1;
                continue;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
                continue;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
                continue;
            }
            '|' => {
                let start = pos;
                pos += 1;
                while pos < chars.len() && chars[pos] == ' ' {
                    pos += 1;
                }
                let word_start = pos;
                while pos < chars.len() && is_word_char(chars[pos]) {
                    pos += 1;
                }
                if pos == word_start {
                    return Err(QueryError::IllegalCharacter(chars[start]));
                }
                tokens.push(Token::Modifier(chars[word_start..pos].iter().collect()));
                continue;
            }
            _ => {}
        }

        if let Some((token, new_pos)) = try_lex_filter(&chars, pos) {
            tokens.push(token);
            pos = new_pos;
            continue;
        }

        if c == '"' || c == '\'' {
            let (text, new_pos) = lex_quoted(&chars, pos);
            tokens.push(Token::Collection(text));
            pos = new_pos;
            continue;
        }

        if is_word_char(c) {
            let start = pos;
            while pos < chars.len() && is_word_char(chars[pos]) {
                pos += 1;
            }
            tokens.push(Token::Collection(chars[start..pos].iter().collect()));
            continue;
        }

        return Err(QueryError::IllegalCharacter(c));
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Try to match `[filter-alphabet]{1,2}` immediately followed by a quoted
/// string. One- vs two-character alias is disambiguated by whether the
/// character right after the first filter letter is itself the quote
/// delimiter.
fn try_lex_filter(chars: &[char], pos: usize) -> Option<(Token, usize)> {
    let first = *chars.get(pos)?;
    if !FILTER_ALPHABET.contains(&first.to_ascii_lowercase()) {
        return None;
    }

    let second = *chars.get(pos + 1)?;
    let (alias_len, quote_pos) = if second == '"' || second == '\'' {
        (1, pos + 1)
    } else {
        if !FILTER_ALPHABET.contains(&second.to_ascii_lowercase()) {
            return None;
        }
        let third = *chars.get(pos + 2)?;
        if third != '"' && third != '\'' {
            return None;
        }
        (2, pos + 2)
    };

    let alias: String = chars[pos..pos + alias_len].iter().collect();
    let exact = alias.chars().next().is_some_and(|c| c.is_uppercase());
    let (pattern, new_pos) = lex_quoted(chars, quote_pos);

    Some((
        Token::Filter {
            alias: alias.to_lowercase(),
            exact,
            pattern,
        },
        new_pos,
    ))
}

/// Consume a quote-delimited string starting at `pos` (which must be a
/// quote char), honoring `\`-escapes of the delimiter only. Returns the
/// unescaped text and the position right after the closing quote; an
/// unterminated string consumes to end of input.
fn lex_quoted(chars: &[char], pos: usize) -> (String, usize) {
    let delimiter = chars[pos];
    let mut i = pos + 1;
    let mut text = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && chars.get(i + 1) == Some(&delimiter) {
            text.push(delimiter);
            i += 2;
            continue;
        }
        if c == delimiter {
            i += 1;
            break;
        }
        text.push(c);
        i += 1;
    }
    (text, i)
}
