//! 土耳其语的形态切分。
//!
//! 文本按空格分词，分隔符各自成词；词内在大写字母处再切开，
//! 大写以零宽标记词编码，正文一律处理小写形式。
//! 每个位置上按词根 > 后缀 > BPE 的固定优先级查询各词表内的最长前缀词面，
//! 全部落空时产生 unk 词并前进一个字符，因此切分必然终止且覆盖全部输入。
//! 给定同一词表，切分是输入的纯函数。

use crate::{utok, Kind, Token, Vocab};

/// 把一段不含特殊词字面的文本切分为词序列。
pub(crate) fn segment(vocab: &Vocab, text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let parts = text.split(' ').collect::<Vec<_>>();
    for (i, part) in parts.iter().enumerate() {
        if !part.is_empty() {
            word(vocab, part, &mut tokens);
        }
        // 每个分隔符对应一个空格词，连续空格逐个保留
        if i + 1 < parts.len() {
            tokens.push(piece_token(vocab, " "));
        }
    }
    tokens
}

/// 土耳其语专用小写化：İ→i、I→ı，其余按通用规则。
pub(crate) fn tr_lower(s: &str) -> String {
    s.replace('İ', "i").replace('I', "ı").to_lowercase()
}

/// 首字母的土耳其语大写化，解码时消费大写标记用：i→İ、ı→I，其余按通用规则。
pub(crate) fn tr_upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some('i') => format!("İ{}", chars.as_str()),
        Some('ı') => format!("I{}", chars.as_str()),
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn word(vocab: &Vocab, word: &str, out: &mut Vec<Token>) {
    for (piece, upper) in camel_split(word) {
        if upper {
            out.push(marker(vocab));
        }
        let lowered = tr_lower(&piece);
        let mut rest = lowered.as_str();
        while !rest.is_empty() {
            match match_at(vocab, rest) {
                Some((len, id, kind)) => {
                    out.push(Token {
                        piece: rest[..len].to_string(),
                        id,
                        kind,
                    });
                    rest = &rest[len..];
                }
                None => {
                    // 任何词表都不认识的字符退化为 unk，原字符不可恢复
                    out.push(unknown(vocab));
                    let mut chars = rest.chars();
                    chars.next();
                    rest = chars.as_str();
                }
            }
        }
    }
}

/// 在词内部的大写字母处切开，每段记录首字符是否大写。
fn camel_split(word: &str) -> Vec<(String, bool)> {
    let chars = word.chars().collect::<Vec<_>>();
    let mut bounds = vec![0];
    for (i, c) in chars.iter().enumerate().skip(1) {
        if c.is_uppercase() {
            bounds.push(i);
        }
    }
    bounds.push(chars.len());
    bounds
        .windows(2)
        .filter(|w| w[0] < w[1])
        .map(|w| {
            let piece = chars[w[0]..w[1]].iter().collect::<String>();
            (piece, chars[w[0]].is_uppercase())
        })
        .collect()
}

/// 每个位置按词根 > 后缀 > BPE 的固定优先级取表内最长前缀。
fn match_at(vocab: &Vocab, text: &str) -> Option<(usize, utok, Kind)> {
    for kind in [Kind::Root, Kind::Suffix, Kind::Bpe] {
        if let Some((len, id)) = vocab.longest_prefix(kind, text) {
            return Some((len, id, kind));
        }
    }
    None
}

/// 以完整字面查一个单独的词，用于空格分隔符。
fn piece_token(vocab: &Vocab, piece: &str) -> Token {
    for kind in [Kind::Root, Kind::Suffix, Kind::Bpe] {
        if let Some(id) = vocab.lookup_surface(kind, piece) {
            return Token {
                piece: piece.to_string(),
                id,
                kind,
            };
        }
    }
    unknown(vocab)
}

fn unknown(vocab: &Vocab) -> Token {
    let unk = &vocab.specials().unk;
    Token {
        piece: unk.piece.clone(),
        id: unk.id,
        kind: Kind::Special,
    }
}

fn marker(vocab: &Vocab) -> Token {
    let upper = &vocab.specials().uppercase;
    Token {
        piece: upper.piece.clone(),
        id: upper.id,
        kind: Kind::Special,
    }
}
