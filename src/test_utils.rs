//! 单元测试共用的小词表，与 tests/fixtures 下的文件一致。

use crate::{Tokenizer, Vocab};

pub(crate) fn vocab() -> Vocab {
    Vocab::from_json(
        include_str!("../tests/fixtures/kokler.json"),
        include_str!("../tests/fixtures/ekler.json"),
        include_str!("../tests/fixtures/bpe_tokenler.json"),
        include_str!("../tests/fixtures/ozel_tokenler.json"),
    )
    .unwrap()
}

pub(crate) fn tokenizer() -> Tokenizer {
    Tokenizer::new(vocab())
}
