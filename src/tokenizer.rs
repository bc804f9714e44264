//! 面向使用者的编解码器。
//!
//! 在形态切分之上管理特殊词：编码前先用正则交替式在原文中定位特殊词字面，
//! 段间文本交给切分器；可选地按固定模板 `[bos?] ids [eos]` 包裹；
//! 解码时消费大写标记恢复大小写，并可选地剔除特殊词。

use crate::{segment, utok, Error, Kind, Result, SpecialPiece, Token, Vocab};
use regex::Regex;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::LazyLock,
};

pub struct Tokenizer {
    vocab: Vocab,
    special_regex: Regex,
}

impl Tokenizer {
    pub fn new(vocab: Vocab) -> Self {
        let special_regex = build_pattern(vocab.specials().iter().map(|p| &p.piece));
        Self {
            vocab,
            special_regex,
        }
    }

    /// 从目录加载词表构造分词器。
    pub fn from_pretrained(dir: impl AsRef<Path>) -> Result<Self> {
        Vocab::load(dir).map(Self::new)
    }

    /// 把词表写回目录，与 [`Tokenizer::from_pretrained`] 互逆。
    pub fn save_pretrained(&self, dir: impl AsRef<Path>) -> Result<()> {
        self.vocab.save(dir)
    }

    #[inline]
    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// 完整的切分结果，含词序号与词类。
    pub fn tokenize_text(&self, text: &str) -> Vec<Token> {
        let mut ans = Vec::new();
        let mut start = 0;
        if !self.special_regex.as_str().is_empty() {
            for m in self.special_regex.find_iter(text) {
                ans.extend(segment::segment(&self.vocab, &text[start..m.start()]));
                // 特殊词字面出现在原文中时直接映射到其保留序号
                if let Some(p) = self.vocab.specials().find_piece(m.as_str()) {
                    ans.push(special_token(p));
                }
                start = m.end();
            }
        }
        ans.extend(segment::segment(&self.vocab, &text[start..]));
        ans
    }

    /// 仅字面的切分结果。
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokenize_text(text)
            .into_iter()
            .map(|t| t.piece)
            .collect()
    }

    /// 文本编码为序号序列。`add_special_tokens` 按固定模板 `[bos?] ids [eos]` 包裹。
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Vec<utok> {
        let ids = self.tokenize_text(text).into_iter().map(|t| t.id);
        if add_special_tokens {
            let specials = self.vocab.specials();
            let mut ans = Vec::new();
            if let Some(bos) = &specials.bos {
                ans.push(bos.id);
            }
            ans.extend(ids);
            ans.push(specials.eos.id);
            ans
        } else {
            ids.collect()
        }
    }

    /// 逐条独立编码，条目之间互不影响；不做填充。
    pub fn encode_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        add_special_tokens: bool,
    ) -> Vec<Vec<utok>> {
        texts
            .iter()
            .map(|t| self.encode(t.as_ref(), add_special_tokens))
            .collect()
    }

    /// 序号序列解码回文本。
    pub fn decode(&self, ids: &[utok], skip_special_tokens: bool) -> Result<String> {
        let specials = self.vocab.specials();
        let mut ans = String::new();
        let mut capitalize = false;
        for &id in ids {
            let (piece, kind) = self.vocab.lookup_id(id).ok_or(Error::InvalidId(id))?;
            // 大写标记是零宽的：本身不渲染，只提升下一个正文词的首字母
            if id == specials.uppercase.id {
                capitalize = true;
            } else if kind == Kind::Special {
                if !skip_special_tokens {
                    ans.push_str(piece);
                }
            } else if std::mem::take(&mut capitalize) {
                ans.push_str(&segment::tr_upper_first(piece));
            } else {
                ans.push_str(piece);
            }
        }
        Ok(ans)
    }

    /// 字面转序号。不在词表中的字面退化为 unk，与编码路径的兜底一致。
    pub fn convert_tokens_to_ids<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<utok> {
        let unk = self.vocab.specials().unk.id;
        tokens
            .iter()
            .map(|t| self.vocab.exact(t.as_ref()).unwrap_or(unk))
            .collect()
    }

    /// 序号转字面，无效序号报错。
    pub fn convert_ids_to_tokens(&self, ids: &[utok]) -> Result<Vec<String>> {
        ids.iter()
            .map(|&id| {
                self.vocab
                    .lookup_id(id)
                    .map(|(piece, _)| piece.to_string())
                    .ok_or(Error::InvalidId(id))
            })
            .collect()
    }

    /// 全类别合并的字面到序号映射。
    pub fn get_vocab(&self) -> &HashMap<String, utok> {
        self.vocab.merged()
    }

    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.vocab.vocab_size()
    }
}

/// 特殊词的命名访问器。
impl Tokenizer {
    #[inline]
    pub fn pad_token(&self) -> &str {
        &self.vocab.specials().pad.piece
    }
    #[inline]
    pub fn pad_token_id(&self) -> utok {
        self.vocab.specials().pad.id
    }
    #[inline]
    pub fn unk_token(&self) -> &str {
        &self.vocab.specials().unk.piece
    }
    #[inline]
    pub fn unk_token_id(&self) -> utok {
        self.vocab.specials().unk.id
    }
    #[inline]
    pub fn eos_token(&self) -> &str {
        &self.vocab.specials().eos.piece
    }
    #[inline]
    pub fn eos_token_id(&self) -> utok {
        self.vocab.specials().eos.id
    }
    #[inline]
    pub fn uppercase_token(&self) -> &str {
        &self.vocab.specials().uppercase.piece
    }
    #[inline]
    pub fn uppercase_token_id(&self) -> utok {
        self.vocab.specials().uppercase.id
    }
    #[inline]
    pub fn bos_token(&self) -> Option<&str> {
        self.vocab.specials().bos.as_ref().map(|p| p.piece.as_str())
    }
    #[inline]
    pub fn bos_token_id(&self) -> Option<utok> {
        self.vocab.specials().bos.as_ref().map(|p| p.id)
    }
    #[inline]
    pub fn sep_token(&self) -> Option<&str> {
        self.vocab.specials().sep.as_ref().map(|p| p.piece.as_str())
    }
    #[inline]
    pub fn sep_token_id(&self) -> Option<utok> {
        self.vocab.specials().sep.as_ref().map(|p| p.id)
    }
    #[inline]
    pub fn cls_token(&self) -> Option<&str> {
        self.vocab.specials().cls.as_ref().map(|p| p.piece.as_str())
    }
    #[inline]
    pub fn cls_token_id(&self) -> Option<utok> {
        self.vocab.specials().cls.as_ref().map(|p| p.id)
    }
    #[inline]
    pub fn mask_token(&self) -> Option<&str> {
        self.vocab.specials().mask.as_ref().map(|p| p.piece.as_str())
    }
    #[inline]
    pub fn mask_token_id(&self) -> Option<utok> {
        self.vocab.specials().mask.as_ref().map(|p| p.id)
    }
}

fn special_token(p: &SpecialPiece) -> Token {
    Token {
        piece: p.piece.clone(),
        id: p.id,
        kind: Kind::Special,
    }
}

fn build_pattern<'a>(text: impl IntoIterator<Item = &'a String>) -> Regex {
    static SPECIAL: LazyLock<HashSet<char>> = LazyLock::new(|| {
        HashSet::from([
            '*', '.', '?', '+', '^', '$', '|', '/', '\\', '(', ')', '[', ']', '{', '}',
        ])
    });

    let mut pattern = String::new();
    for p in text {
        for c in p.chars() {
            if SPECIAL.contains(&c) {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('|');
    }
    pattern.pop();

    Regex::new(&pattern).unwrap()
}
