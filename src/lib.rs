#![deny(warnings)]

mod segment;
mod tokenizer;
mod vocab;

#[cfg(test)]
pub(crate) mod test_utils;

use serde::{Deserialize, Serialize};

pub use tokenizer::Tokenizer;
pub use vocab::{SpecialPiece, SpecialTokens, Vocab};

/// `utok` for token id.
#[allow(non_camel_case_types)]
pub type utok = u32;

/// 词类。每类词占据一段连续的序号区间，因此词类可以仅由序号恢复。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "ROOT")]
    Root,
    #[serde(rename = "SUFFIX")]
    Suffix,
    #[serde(rename = "BPE")]
    Bpe,
    #[serde(rename = "SPECIAL")]
    Special,
}

/// 切分产生的一个词：字面内容、词序号和词类。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub piece: String,
    pub id: utok,
    pub kind: Kind,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 词表文件无法解析
    #[error("malformed vocabulary: {0}")]
    VocabularyFormat(String),
    /// 词表内容违反约束：词类之间字面交叠、序号区间不连续或互相重叠
    #[error("vocabulary integrity violated: {0}")]
    VocabularyIntegrity(String),
    /// 解码遇到不属于任何区间的词序号
    #[error("token id {0} is outside every vocabulary range")]
    InvalidId(utok),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::VocabularyFormat(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
