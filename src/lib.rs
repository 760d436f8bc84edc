//! Metadata Routing for Clustered Filesystems.
//!
//! `mdsroute`は、クラスタ型ファイルシステムのクライアント側に位置する、
//! メタデータのルーティング・リクエストファンアウト層.
//! N台の独立したメタデータサーバ(それぞれがFID空間の互いに素な断片を
//! 保持する)の上に、単一の名前空間の意味論を提供する.
//!
//! # 特徴
//!
//! - [FID](位置に依存しない一意識別子)から担当サーバへのルーティング
//!   - 所在の解決は外部の位置サービス([FidLocator])に委譲
//! - ストライプ化ディレクトリ(一つのディレクトリを複数サーバに分割配置
//!   したもの)のサポート
//!   - エントリ名のハッシュによる決定論的なストライプ選択
//!   - 全ストライプに対するページ読み出しのハッシュ順マージ
//! - 複数サーバに跨るcreate/link/unlink/renameの編成
//!   - 操作本体に先行するロック取消の順序付け
//!   - クロスリファレンス応答(オブジェクトの所在が移動していた場合)への
//!     上限付きの自動再試行
//! - 接続ライフサイクルの管理と、活性/非活性イベントの上位層への転送
//! - RPC層・位置サービス・ロックマネージャそれ自体は実装しない
//!   ([mds]モジュールのトレイト群を通じて外部の協力者として利用する)
//!
//! # モジュールの依存関係
//!
//! ```text
//! service => router => {dir, layout, target} => mds
//! ```
//!
//! - [service]モジュール:
//!   - ルータを複数のワーカスレッドで駆動する非同期ファサード
//!   - `Future`ベースのAPIが必要な利用者はこの構造体を経由する
//! - [router]モジュール:
//!   - 主に[Router]構造体を提供
//!   - ターゲット選択・分散操作の編成・接続管理を担当する
//! - [dir]/[layout]/[target]モジュール:
//!   - それぞれ、ディレクトリのマージ読み出し・ストライプ記述子・
//!     ターゲットのレジストリを提供する
//! - [mds]モジュール:
//!   - 外部協力者(接続層・位置サービス・監視者)とのインターフェース定義
//!   - テスト用のプロセス内実装である[MemoryCluster]もここに含まれる
//!
//! [FidLocator]: ./mds/trait.FidLocator.html
//! [service]: ./service/index.html
//! [router]: ./router/index.html
//! [Router]: ./router/struct.Router.html
//! [dir]: ./dir/index.html
//! [layout]: ./layout/index.html
//! [target]: ./target/index.html
//! [mds]: ./mds/index.html
//! [MemoryCluster]: ./mds/struct.MemoryCluster.html
#![warn(missing_docs)]
extern crate byteorder;
extern crate fibers;
#[cfg(test)]
extern crate fibers_global;
extern crate futures;
extern crate prometrics;
extern crate siphasher;
#[macro_use]
extern crate slog;
#[macro_use]
extern crate trackable;
extern crate uuid;

pub use crate::error::{Error, ErrorKind};

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub mod dir;
pub mod fid;
pub mod layout;
pub mod mds;
pub mod metrics;
pub mod op;
pub mod router;
pub mod service;
pub mod target;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
