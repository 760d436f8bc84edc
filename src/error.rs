use std;
use trackable;
use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else {
            ErrorKind::Other.cause(e).into()
        }
    }
}
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ErrorKind::Other
            .cause(std::error::Error::description(&e))
            .into()
    }
}

/// 発生し得るエラーの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 指定されたインデックスにターゲットが登録されていない.
    ///
    /// # 典型的な対応策
    ///
    /// - 構成を見直して、該当インデックスのターゲットを登録する
    NoSuchTarget,

    /// ターゲットが一つも構成されていない、ないし接続が確立されていない.
    ///
    /// 非活性状態のターゲットに操作が発行された場合にも、このエラーが返される.
    ///
    /// # 典型的な対応策
    ///
    /// - `connect()`を呼び出してから操作を発行する
    /// - 該当サーバの復旧後に、利用者がリトライする
    NotConnected,

    /// 指定された名前ないしオブジェクトが、問い合わせ先のサーバに存在しない.
    ///
    /// ストライプ化ディレクトリの逐次探索中には、このエラーは
    /// 「次のストライプを試行する」ための契機としても扱われる.
    NotFound,

    /// ストライプ記述子のハッシュ種別が未知.
    ///
    /// 名前から担当ストライプを直接計算できないことを示しており、
    /// 呼び出し側は全ストライプの逐次探索に切り替える必要がある.
    UnknownHashType,

    /// FID位置サービスがオブジェクトの所在を解決できなかった.
    ///
    /// 位置キャッシュが古い場合等に発生する.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者が時間をおいてリトライする
    StaleLocation,

    /// ストライプ記述子のバイナリ形式が不正.
    ///
    /// マジックナンバーの不一致や、プール名の超過等で発生する.
    InvalidFormat,

    /// 入力が不正.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// 内部状態が不整合に陥っている.
    ///
    /// プログラムにバグがあることを示している.
    InconsistentState,

    /// 入出力エラー.
    ///
    /// 活性なターゲットが一つも存在しない状態での操作発行、
    /// ブロードキャスト操作の全ターゲットでの失敗、
    /// およびリダイレクト回数の上限超過、の場合に返される.
    Io,

    /// その他エラー.
    ///
    /// E.g., リモートサーバが返した、上記のいずれにも該当しないエラー
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}
