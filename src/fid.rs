//! FID関連のデータ構造群.
//!
//! "FID"は、クラスタ全体で一意なオブジェクト識別子.
//! どのサーバにオブジェクトが格納されているかとは独立に採番されるため、
//! オブジェクトがサーバ間を移動しても値は不変となる.
//!
//! FIDから担当サーバへの解決は[FidLocator]が担う.
//!
//! [FidLocator]: ../mds/trait.FidLocator.html
use std::fmt;
use std::str::FromStr;
use trackable::error::ErrorKindExt;

use crate::{Error, ErrorKind, Result};

/// クラスタ全体で一意なオブジェクト識別子.
///
/// `(シーケンス番号, オブジェクトID, バージョン)`の三つ組で構成される.
/// シーケンス番号の区間が、FID位置サービスによってサーバに割り当てられるため、
/// FIDそれ自体には所在情報は含まれない.
#[derive(Clone, Copy, Default, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Fid {
    /// シーケンス番号.
    pub seq: u64,

    /// シーケンス内のオブジェクトID.
    pub oid: u32,

    /// バージョン番号.
    pub ver: u32,
}
impl Fid {
    /// 識別子のバイト幅.
    pub const SIZE: usize = 16;

    /// ゼロFID.
    ///
    /// 「子のFIDが未知」等を表すための番兵値であり、実在のオブジェクトを指すことはない.
    pub const ZERO: Fid = Fid {
        seq: 0,
        oid: 0,
        ver: 0,
    };

    /// 新しい`Fid`インスタンスを生成する.
    ///
    /// # Examples
    ///
    /// ```
    /// use mdsroute::fid::Fid;
    ///
    /// assert_eq!(Fid::new(0x200000400, 0x12, 0).to_string(), "[0x200000400:0x12:0x0]");
    /// ```
    pub fn new(seq: u64, oid: u32, ver: u32) -> Self {
        Fid { seq, oid, ver }
    }

    /// ゼロFIDかどうかを判定する.
    pub fn is_zero(&self) -> bool {
        self.seq == 0 && self.oid == 0 && self.ver == 0
    }

    /// 実在のオブジェクトを指し得る正常なFIDかどうかを判定する.
    ///
    /// シーケンス番号とオブジェクトIDの双方が非ゼロの場合のみ、正常と見なされる.
    pub fn is_sane(&self) -> bool {
        self.seq != 0 && self.oid != 0
    }
}
impl FromStr for Fid {
    type Err = Error;

    /// `"[0xSEQ:0xOID:0xVER]"`形式の文字列から`Fid`を生成する.
    ///
    /// # Errors
    ///
    /// 形式が不正な場合には、種類が`ErrorKind::InvalidInput`のエラーが返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use mdsroute::fid::Fid;
    ///
    /// assert_eq!("[0x200000400:0x12:0x0]".parse::<Fid>().unwrap(),
    ///            Fid::new(0x200000400, 0x12, 0));
    /// assert!("0x200000400".parse::<Fid>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        track_assert!(
            s.starts_with('[') && s.ends_with(']'),
            ErrorKind::InvalidInput,
            "Malformed FID: {:?}",
            s
        );
        let mut tokens = s[1..s.len() - 1].splitn(3, ':');
        let mut next = || -> Result<u64> {
            let token = track_assert_some!(tokens.next(), ErrorKind::InvalidInput);
            track_assert!(
                token.starts_with("0x"),
                ErrorKind::InvalidInput,
                "Malformed FID component: {:?}",
                token
            );
            let value = track!(u64::from_str_radix(&token[2..], 16)
                .map_err(|e| ErrorKind::InvalidInput.cause(e)))?;
            Ok(value)
        };
        let seq = track!(next())?;
        let oid = track!(next())? as u32;
        let ver = track!(next())? as u32;
        Ok(Fid::new(seq, oid, ver))
    }
}
impl fmt::Debug for Fid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, r#"Fid("{}")"#, self)
    }
}
impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:#x}:{:#x}:{:#x}]", self.seq, self.oid, self.ver)
    }
}
