//! 词表的加载、校验与查询。
//!
//! 词表由三类普通词（词根、后缀、BPE 回退词）和一组保留的特殊词构成。
//! 每类词的序号构成一段连续区间，区间互不重叠，因此词类可以仅由序号恢复；
//! 三类普通词的字面内容两两不相交。这些约束在加载时一次性校验，
//! 之后词表只读，可以在多个线程间安全共享。

use crate::{utok, Error, Kind, Result};
use patricia_tree::PatriciaMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs,
    path::Path,
    pin::Pin,
};

const ROOTS_FILE: &str = "kokler.json";
const SUFFIXES_FILE: &str = "ekler.json";
const BPE_FILE: &str = "bpe_tokenler.json";
const SPECIALS_FILE: &str = "ozel_tokenler.json";

const TABLE_NAMES: [&str; 3] = ["kokler", "ekler", "bpe_tokenler"];

/// 一个命名特殊词：字面内容和保留的词序号。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialPiece {
    pub piece: String,
    pub id: utok,
}

/// 特殊词配置。pad/unk/eos/uppercase 必须存在，其余可选。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub pad: SpecialPiece,
    pub unk: SpecialPiece,
    pub eos: SpecialPiece,
    pub uppercase: SpecialPiece,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bos: Option<SpecialPiece>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sep: Option<SpecialPiece>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cls: Option<SpecialPiece>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<SpecialPiece>,
}

impl SpecialTokens {
    /// 按固定顺序遍历已配置的特殊词。
    pub fn iter(&self) -> impl Iterator<Item = &SpecialPiece> {
        [
            Some(&self.pad),
            Some(&self.unk),
            Some(&self.eos),
            Some(&self.uppercase),
            self.bos.as_ref(),
            self.sep.as_ref(),
            self.cls.as_ref(),
            self.mask.as_ref(),
        ]
        .into_iter()
        .flatten()
    }

    pub(crate) fn find_piece(&self, piece: &str) -> Option<&SpecialPiece> {
        self.iter().find(|p| p.piece == piece)
    }

    pub(crate) fn find_id(&self, id: utok) -> Option<&SpecialPiece> {
        self.iter().find(|p| p.id == id)
    }
}

/// 一类普通词的存储。
#[derive(Debug)]
struct Table {
    /// 保存本类所有词的字面内容，以 u8 为单位所以不需要对齐，占用空间少
    text: Pin<Box<[u8]>>,
    /// 按 `id - base` 顺序保存每个词在 text 中的位置
    slices: Box<[(u32, u32)]>,
    /// 词面的前缀树，用于最长前缀匹配
    trie: PatriciaMap<utok>,
    /// 序号区间起点
    base: utok,
}

impl Table {
    fn build(entries: &BTreeMap<String, utok>, what: &'static str) -> Result<Self> {
        let mut min = utok::MAX;
        let mut max = 0;
        for (s, &id) in entries {
            if s.is_empty() {
                return Err(Error::VocabularyFormat(format!("{what}: empty surface")));
            }
            min = min.min(id);
            max = max.max(id);
        }
        let n = entries.len();
        if n == 0 {
            return Ok(Self {
                text: unsafe { Pin::new_unchecked(Vec::new().into_boxed_slice()) },
                slices: Box::new([]),
                trie: PatriciaMap::new(),
                base: 0,
            });
        }
        if (max - min) as usize != n - 1 {
            return Err(Error::VocabularyIntegrity(format!(
                "{what}: {n} entries do not fill the id range [{min}, {max}]"
            )));
        }

        // 字面内容与元信息分离。长词先入缓存，短词可能是长词的子串，可复用其内容
        let mut order = entries.keys().collect::<Vec<_>>();
        order.sort_unstable_by_key(|s| -(s.len() as isize));
        let mut text_buf = Vec::<u8>::with_capacity(order.iter().map(|s| s.len()).sum());
        let mut slices = vec![(u32::MAX, 0u32); n];
        for s in order {
            let i = (entries[s.as_str()] - min) as usize;
            if slices[i].0 != u32::MAX {
                return Err(Error::VocabularyIntegrity(format!(
                    "{what}: id {} assigned to more than one surface",
                    min + i as utok
                )));
            }
            let v = s.as_bytes();
            // 查找子串，若存在则复用，否则将新的内容追加到缓存
            let off = memchr::memmem::find(&text_buf, v).unwrap_or_else(|| {
                let off = text_buf.len();
                text_buf.extend_from_slice(v);
                off
            });
            slices[i] = (off as u32, v.len() as u32);
        }
        // 锁定字面内容的位置，以实现安全的自引用
        let text = unsafe { Pin::new_unchecked(text_buf.into_boxed_slice()) };
        let trie = slices
            .iter()
            .enumerate()
            .map(|(i, &(off, len))| (&text[off as usize..][..len as usize], min + i as utok))
            .collect();
        Ok(Self {
            text,
            slices: slices.into_boxed_slice(),
            trie,
            base: min,
        })
    }

    #[inline]
    fn len(&self) -> usize {
        self.slices.len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    #[inline]
    fn contains(&self, id: utok) -> bool {
        id >= self.base && ((id - self.base) as usize) < self.slices.len()
    }

    /// token id -> 字面内容
    #[inline]
    fn piece(&self, id: utok) -> &str {
        let (off, len) = self.slices[(id - self.base) as usize];
        // 内容由合法的字符串构造，无需再次校验
        unsafe { std::str::from_utf8_unchecked(&self.text[off as usize..][..len as usize]) }
    }

    /// 本表中作为 text 前缀的最长词面，返回其字节长度和序号。
    #[inline]
    fn longest_prefix(&self, text: &str) -> Option<(usize, utok)> {
        self.trie
            .get_longest_common_prefix(text.as_bytes())
            .map(|(pre, &tok)| (pre.len(), tok))
    }

    fn entries(&self) -> impl Iterator<Item = (&str, utok)> + '_ {
        (0..self.slices.len()).map(move |i| {
            let id = self.base + i as utok;
            (self.piece(id), id)
        })
    }
}

#[derive(Debug)]
pub struct Vocab {
    /// 三类普通词表，顺序即匹配优先级：词根 > 后缀 > BPE
    tables: [Table; 3],
    specials: SpecialTokens,
    /// 特殊词序号区间 [base, base + len)
    special_range: (utok, u32),
    /// 全类别合并的精确查找表
    merged: HashMap<String, utok>,
}

impl Vocab {
    /// 从四段 JSON 文本构造词表：三类普通词是词面到序号的映射，特殊词是命名记录。
    pub fn from_json(roots: &str, suffixes: &str, bpe: &str, specials: &str) -> Result<Self> {
        Self::build(
            serde_json::from_str(roots)?,
            serde_json::from_str(suffixes)?,
            serde_json::from_str(bpe)?,
            serde_json::from_str(specials)?,
        )
    }

    /// 从目录读取词表的四个组成文件。
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |name: &str| fs::read_to_string(dir.join(name));
        Self::from_json(
            &read(ROOTS_FILE)?,
            &read(SUFFIXES_FILE)?,
            &read(BPE_FILE)?,
            &read(SPECIALS_FILE)?,
        )
    }

    /// 以排序、定格式写出词表，「保存-加载-保存」字节级一致。
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        for (name, kind) in [
            (ROOTS_FILE, Kind::Root),
            (SUFFIXES_FILE, Kind::Suffix),
            (BPE_FILE, Kind::Bpe),
        ] {
            let map = self.all_entries(kind).collect::<BTreeMap<_, _>>();
            fs::write(dir.join(name), serde_json::to_string_pretty(&map)?)?;
        }
        fs::write(
            dir.join(SPECIALS_FILE),
            serde_json::to_string_pretty(&self.specials)?,
        )?;
        Ok(())
    }

    fn build(
        roots: BTreeMap<String, utok>,
        suffixes: BTreeMap<String, utok>,
        bpe: BTreeMap<String, utok>,
        specials: SpecialTokens,
    ) -> Result<Self> {
        let tables = [
            Table::build(&roots, TABLE_NAMES[0])?,
            Table::build(&suffixes, TABLE_NAMES[1])?,
            Table::build(&bpe, TABLE_NAMES[2])?,
        ];

        // 特殊词同样要求序号连续且不重复
        let mut count = 0usize;
        let mut ids = BTreeSet::new();
        for p in specials.iter() {
            if p.piece.is_empty() {
                return Err(Error::VocabularyFormat(
                    "ozel_tokenler: empty surface".into(),
                ));
            }
            count += 1;
            ids.insert(p.id);
        }
        if ids.len() != count {
            return Err(Error::VocabularyIntegrity(
                "ozel_tokenler: duplicate special token ids".into(),
            ));
        }
        let base = ids.first().copied().unwrap_or(0);
        let last = ids.last().copied().unwrap_or(0);
        if (last - base) as usize != count - 1 {
            return Err(Error::VocabularyIntegrity(format!(
                "ozel_tokenler: {count} entries do not fill the id range [{base}, {last}]"
            )));
        }

        // 各区间互不重叠
        let mut ranges = vec![(base, count as u32, "ozel_tokenler")];
        for (table, name) in tables.iter().zip(TABLE_NAMES) {
            if !table.is_empty() {
                ranges.push((table.base, table.len() as u32, name));
            }
        }
        ranges.sort_unstable_by_key(|r| r.0);
        for w in ranges.windows(2) {
            let (a_base, a_len, a_name) = w[0];
            let (b_base, _, b_name) = w[1];
            if a_base as u64 + a_len as u64 > b_base as u64 {
                return Err(Error::VocabularyIntegrity(format!(
                    "id ranges of {a_name} and {b_name} overlap"
                )));
            }
        }

        // 合并查找表，同时校验字面两两不相交
        let size = tables.iter().map(Table::len).sum::<usize>() + count;
        let mut merged = HashMap::with_capacity(size);
        for table in &tables {
            for (s, id) in table.entries() {
                if merged.insert(s.to_string(), id).is_some() {
                    return Err(Error::VocabularyIntegrity(format!(
                        "surface {s:?} appears in more than one table"
                    )));
                }
            }
        }
        for p in specials.iter() {
            if merged.insert(p.piece.clone(), p.id).is_some() {
                return Err(Error::VocabularyIntegrity(format!(
                    "surface {:?} appears in more than one table",
                    p.piece
                )));
            }
        }

        log::debug!(
            "vocabulary loaded: {} roots + {} suffixes + {} bpe pieces + {count} specials",
            tables[0].len(),
            tables[1].len(),
            tables[2].len(),
        );

        Ok(Self {
            tables,
            specials,
            special_range: (base, count as u32),
            merged,
        })
    }

    fn table(&self, kind: Kind) -> Option<&Table> {
        match kind {
            Kind::Root => Some(&self.tables[0]),
            Kind::Suffix => Some(&self.tables[1]),
            Kind::Bpe => Some(&self.tables[2]),
            Kind::Special => None,
        }
    }

    /// 字面在指定词类中的序号。
    pub fn lookup_surface(&self, kind: Kind, text: &str) -> Option<utok> {
        let &id = self.merged.get(text)?;
        (self.kind_of(id) == Some(kind)).then_some(id)
    }

    /// 序号对应的字面和词类，用于解码。
    pub fn lookup_id(&self, id: utok) -> Option<(&str, Kind)> {
        match self.kind_of(id)? {
            Kind::Special => self
                .specials
                .find_id(id)
                .map(|p| (p.piece.as_str(), Kind::Special)),
            kind => self.table(kind).map(|t| (t.piece(id), kind)),
        }
    }

    /// 仅由序号恢复词类。
    pub fn kind_of(&self, id: utok) -> Option<Kind> {
        let (base, len) = self.special_range;
        if id >= base && id - base < len {
            return Some(Kind::Special);
        }
        [Kind::Root, Kind::Suffix, Kind::Bpe]
            .into_iter()
            .find(|&kind| self.table(kind).is_some_and(|t| t.contains(id)))
    }

    /// 全部词类的序号总数。
    pub fn vocab_size(&self) -> usize {
        self.merged.len()
    }

    /// 遍历一类词的全部 (字面, 序号) 条目。
    pub fn all_entries(&self, kind: Kind) -> Box<dyn Iterator<Item = (&str, utok)> + '_> {
        match self.table(kind) {
            Some(table) => Box::new(table.entries()),
            None => Box::new(self.specials.iter().map(|p| (p.piece.as_str(), p.id))),
        }
    }

    pub fn specials(&self) -> &SpecialTokens {
        &self.specials
    }

    /// text 在指定词类中的最长前缀词面，返回字节长度和序号。
    pub(crate) fn longest_prefix(&self, kind: Kind, text: &str) -> Option<(usize, utok)> {
        self.table(kind)?.longest_prefix(text)
    }

    pub(crate) fn exact(&self, text: &str) -> Option<utok> {
        self.merged.get(text).copied()
    }

    pub(crate) fn merged(&self) -> &HashMap<String, utok> {
        &self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn lookup() {
        let vocab = test_utils::vocab();
        assert_eq!(vocab.lookup_surface(Kind::Root, "kitap"), Some(7));
        assert_eq!(vocab.lookup_surface(Kind::Suffix, "lar"), Some(15));
        assert_eq!(vocab.lookup_surface(Kind::Root, "lar"), None);
        assert_eq!(vocab.lookup_id(7), Some(("kitap", Kind::Root)));
        assert_eq!(vocab.lookup_id(15), Some(("lar", Kind::Suffix)));
        assert_eq!(vocab.lookup_id(1), Some(("<unknown>", Kind::Special)));
        assert_eq!(vocab.lookup_id(9999), None);
    }

    #[test]
    fn kind_from_id_range() {
        let vocab = test_utils::vocab();
        for kind in [Kind::Special, Kind::Root, Kind::Suffix, Kind::Bpe] {
            for (_, id) in vocab.all_entries(kind) {
                assert_eq!(vocab.kind_of(id), Some(kind));
            }
        }
        assert_eq!(vocab.kind_of(9999), None);
    }

    #[test]
    fn sizes() {
        let vocab = test_utils::vocab();
        let by_kind = [Kind::Root, Kind::Suffix, Kind::Bpe, Kind::Special]
            .map(|kind| vocab.all_entries(kind).count());
        assert_eq!(by_kind.iter().sum::<usize>(), vocab.vocab_size());
        assert_eq!(by_kind[3], 5);
    }

    #[test]
    fn longest_prefix_prefers_longest_entry() {
        let vocab = test_utils::vocab();
        // "yorum" 和 "yor" 都是后缀，匹配取长者
        let (len, id) = vocab.longest_prefix(Kind::Suffix, "yorumdan").unwrap();
        assert_eq!((len, id), ("yorum".len(), 22));
        let (len, _) = vocab.longest_prefix(Kind::Suffix, "yormuş").unwrap();
        assert_eq!(len, "yor".len());
        assert_eq!(vocab.longest_prefix(Kind::Suffix, "xyz"), None);
    }

    const SPECIALS: &str = r#"{
        "pad": { "piece": "<pad>", "id": 0 },
        "unk": { "piece": "<unknown>", "id": 1 },
        "eos": { "piece": "<eos>", "id": 2 },
        "uppercase": { "piece": "<uppercase>", "id": 3 }
    }"#;

    #[test]
    fn rejects_surface_in_two_tables() {
        let err = Vocab::from_json(
            r#"{ "ev": 4 }"#,
            r#"{ "ev": 5 }"#,
            r#"{ "a": 6 }"#,
            SPECIALS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VocabularyIntegrity(_)), "{err}");
    }

    #[test]
    fn rejects_id_gap() {
        let err = Vocab::from_json(
            r#"{ "ev": 4, "su": 6 }"#,
            r#"{ "ler": 7 }"#,
            r#"{ "a": 8 }"#,
            SPECIALS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VocabularyIntegrity(_)), "{err}");
    }

    #[test]
    fn rejects_duplicate_id() {
        let err = Vocab::from_json(
            r#"{ "ev": 4, "su": 4, "at": 6 }"#,
            r#"{ "ler": 7 }"#,
            r#"{ "a": 8 }"#,
            SPECIALS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VocabularyIntegrity(_)), "{err}");
    }

    #[test]
    fn rejects_overlapping_ranges() {
        // 后缀区间 [4, 5] 与词根区间 [4, 4] 重叠
        let err = Vocab::from_json(
            r#"{ "ev": 4 }"#,
            r#"{ "ler": 4, "lar": 5 }"#,
            r#"{ "a": 6 }"#,
            SPECIALS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VocabularyIntegrity(_)), "{err}");
    }

    #[test]
    fn rejects_malformed_json() {
        let err = Vocab::from_json("not json", r#"{}"#, r#"{}"#, SPECIALS).unwrap_err();
        assert!(matches!(err, Error::VocabularyFormat(_)), "{err}");
    }

    #[test]
    fn rejects_missing_unk() {
        let err = Vocab::from_json(
            r#"{ "ev": 4 }"#,
            r#"{}"#,
            r#"{}"#,
            r#"{
                "pad": { "piece": "<pad>", "id": 0 },
                "eos": { "piece": "<eos>", "id": 1 },
                "uppercase": { "piece": "<uppercase>", "id": 2 }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VocabularyFormat(_)), "{err}");
    }

    #[test]
    fn rejects_empty_surface() {
        let err = Vocab::from_json(
            r#"{ "": 4 }"#,
            r#"{}"#,
            r#"{}"#,
            SPECIALS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VocabularyFormat(_)), "{err}");
    }

    #[test]
    fn empty_tables_are_allowed() {
        let vocab = Vocab::from_json(r#"{ "ev": 4 }"#, r#"{}"#, r#"{}"#, SPECIALS).unwrap();
        assert_eq!(vocab.vocab_size(), 5);
        assert_eq!(vocab.all_entries(Kind::Suffix).count(), 0);
        assert_eq!(vocab.longest_prefix(Kind::Suffix, "ler"), None);
    }
}
