//! MP4 ファイルから H.264 / AAC のエレメンタリーストリームのサンプルを取り出すためのライブラリ
//!
//! MP4 のボックス構造を [`tree::BoxTree`] として読み込み、
//! サンプルテーブル（`stco`, `stsc`, `stsz`）からサンプルのファイル内での位置を求めて、
//! 映像は Annex-B 形式、音声は ADTS 形式に変換した上で返す。
//!
//! 通常は [`session::Session`] を経由して利用する。
//!
//! fragmented MP4 と、MP4 ファイルの書き込み（mux）には対応していない。
#![warn(missing_docs)]

mod basic_types;
pub mod boxes;
mod codec;
pub mod descriptors;
pub mod locator;
pub mod packager;
pub mod reader;
pub mod session;
pub mod tree;

pub use basic_types::{BoxHeader, BoxSize, BoxType, FullBoxHeader, Uint};
pub use codec::{Decode, Encode, Error, ErrorKind, Result};
pub use locator::{SampleLocation, SampleLocator};
pub use session::{FileSource, ReadAt, Session, SessionOptions};
pub use tree::{BoxId, BoxRef, BoxTree, BoxTreeBuilder};
