use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use trackable::error::ErrorKindExt;

use crate::fid::Fid;
use crate::layout::{
    HashKind, StripeInfo, StripedLayout, HASH_FLAG_MIGRATING, MAX_POOL_NAME_LEN, MAX_STRIPE_COUNT,
};
use crate::mds::FidLocator;
use crate::{ErrorKind, Result};

/// レイアウト記述子の先頭に書き込まれるマジックナンバー.
///
/// "**S**triped **M**etadata **D**escriptor (v**1**)"の略.
pub const MAGIC_NUMBER: [u8; 4] = *b"smd1";

/// プール名フィールドの固定長(バイト単位).
const POOL_NAME_FIELD_LEN: usize = MAX_POOL_NAME_LEN + 1;

impl StripedLayout {
    /// バイナリ形式のレイアウト記述子を`reader`から展開する.
    ///
    /// 記述子に埋め込まれた各ストライプのFIDは、展開の時点で`locator`を
    /// 用いて担当ターゲットへと解決される. 一つでも解決に失敗した場合には、
    /// 展開全体が失敗する.
    ///
    /// # バイナリ形式 (v1)
    ///
    /// ```text
    /// magic(4) stripe_count(4) master_target(4) hash_code(4)
    /// layout_version(4) pool_name(16) fid{seq(8) oid(4) ver(4)}*stripe_count
    /// ```
    ///
    /// 全フィールドはビッグエンディアン. `hash_code`の最上位ビットは
    /// 「移行中」フラグとして解釈される.
    ///
    /// # Errors
    ///
    /// マジックナンバーが未知の場合やストライプ数が不正な場合には、
    /// 種類が`ErrorKind::InvalidFormat`のエラーが返される.
    pub fn read_from<R: Read, L: FidLocator>(mut reader: R, locator: &L) -> Result<Self> {
        let mut magic_number = [0; 4];
        track_io!(reader.read_exact(&mut magic_number))?;
        track_assert_eq!(
            magic_number,
            MAGIC_NUMBER,
            ErrorKind::InvalidFormat,
            "Unrecognized layout magic"
        );

        let stripe_count = track_io!(reader.read_u32::<BigEndian>())?;
        track_assert!(
            stripe_count >= 1 && stripe_count <= MAX_STRIPE_COUNT,
            ErrorKind::InvalidFormat,
            "stripe_count:{}",
            stripe_count
        );

        let master_target = track_io!(reader.read_u32::<BigEndian>())?;
        let hash_code = track_io!(reader.read_u32::<BigEndian>())?;
        let migrating = (hash_code & HASH_FLAG_MIGRATING) != 0;
        let hash = HashKind::from_code(hash_code & !HASH_FLAG_MIGRATING);
        let layout_version = track_io!(reader.read_u32::<BigEndian>())?;

        let mut pool_name = [0; POOL_NAME_FIELD_LEN];
        track_io!(reader.read_exact(&mut pool_name))?;
        let pool_len = pool_name.iter().position(|&b| b == 0);
        let pool_len = track_assert_some!(
            pool_len,
            ErrorKind::InvalidFormat,
            "Unterminated pool name"
        );
        let pool = if pool_len == 0 {
            None
        } else {
            let pool = track!(std::str::from_utf8(&pool_name[..pool_len])
                .map_err(|e| ErrorKind::InvalidFormat.cause(e)))?;
            Some(pool.to_owned())
        };

        let mut stripes = Vec::with_capacity(stripe_count as usize);
        for _ in 0..stripe_count {
            let seq = track_io!(reader.read_u64::<BigEndian>())?;
            let oid = track_io!(reader.read_u32::<BigEndian>())?;
            let ver = track_io!(reader.read_u32::<BigEndian>())?;
            let fid = Fid::new(seq, oid, ver);
            track_assert!(fid.is_sane(), ErrorKind::InvalidFormat, "fid:{}", fid);

            let target = track!(locator.locate(&fid))?;
            stripes.push(StripeInfo::new(fid, target));
        }

        track!(StripedLayout::with_details(
            hash,
            migrating,
            master_target,
            layout_version,
            pool,
            stripes
        ))
    }

    /// レイアウト記述子をバイナリ形式で`writer`に書き込む.
    ///
    /// # Errors
    ///
    /// プール名が`MAX_POOL_NAME_LEN`を超えている場合には、
    /// 種類が`ErrorKind::InvalidFormat`のエラーが返される
    /// (切り詰めは行われない).
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        track_io!(writer.write_all(&MAGIC_NUMBER[..]))?;
        track_io!(writer.write_u32::<BigEndian>(self.stripe_count()))?;
        track_io!(writer.write_u32::<BigEndian>(self.master_target()))?;

        let mut hash_code = self.hash_kind().code();
        if self.is_migrating() {
            hash_code |= HASH_FLAG_MIGRATING;
        }
        track_io!(writer.write_u32::<BigEndian>(hash_code))?;
        track_io!(writer.write_u32::<BigEndian>(self.layout_version()))?;

        let mut pool_name = [0; POOL_NAME_FIELD_LEN];
        if let Some(pool) = self.pool() {
            track_assert!(
                pool.len() <= MAX_POOL_NAME_LEN,
                ErrorKind::InvalidFormat,
                "Too long pool name: {:?}",
                pool
            );
            pool_name[..pool.len()].copy_from_slice(pool.as_bytes());
        }
        track_io!(writer.write_all(&pool_name[..]))?;

        for stripe in self.stripes() {
            let fid = stripe.fid();
            track_io!(writer.write_u64::<BigEndian>(fid.seq))?;
            track_io!(writer.write_u32::<BigEndian>(fid.oid))?;
            track_io!(writer.write_u32::<BigEndian>(fid.ver))?;
        }
        Ok(())
    }
}
