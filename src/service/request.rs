use futures::Future;

use super::thread::ServiceThreadHandle;
use crate::dir::DirPage;
use crate::fid::Fid;
use crate::op::{MdReply, MdRequest, StatFs};
use crate::service::command::{self, Command};
use crate::Error;

/// サービスに対してリクエストを発行するためのビルダ.
///
/// # 注意
///
/// リクエストを発行した結果返される`Future`を効率的にポーリングするためには
/// [`fibers`]を使用する必要がある。
///
/// [`fibers`]: https://github.com/dwango/fibers-rs
#[derive(Debug)]
pub struct ServiceRequest<'a> {
    service: &'a ServiceThreadHandle,
}
impl<'a> ServiceRequest<'a> {
    pub(crate) fn new(service: &'a ServiceThreadHandle) -> Self {
        ServiceRequest { service }
    }

    /// 新しいオブジェクトを作成する.
    ///
    /// 割り当てられた新規オブジェクトのFIDは、リプライの`fid`に設定される.
    pub fn create(&self, req: MdRequest) -> impl Future<Item = MdReply, Error = Error> {
        let (command, response) = command::CreateObject::new(req);
        self.service.send_command(Command::Create(command));
        response
    }

    /// 既存オブジェクトへのハードリンクを作成する.
    pub fn link(&self, req: MdRequest) -> impl Future<Item = MdReply, Error = Error> {
        let (command, response) = command::LinkObject::new(req);
        self.service.send_command(Command::Link(command));
        response
    }

    /// エントリを削除する.
    pub fn unlink(&self, req: MdRequest) -> impl Future<Item = MdReply, Error = Error> {
        let (command, response) = command::UnlinkObject::new(req);
        self.service.send_command(Command::Unlink(command));
        response
    }

    /// エントリ名を変更(ないし移動)する.
    pub fn rename(&self, req: MdRequest) -> impl Future<Item = MdReply, Error = Error> {
        let (command, response) = command::RenameObject::new(req);
        self.service.send_command(Command::Rename(command));
        response
    }

    /// FIDで指定されたオブジェクトの属性を取得する.
    pub fn getattr(&self, fid: Fid) -> impl Future<Item = MdReply, Error = Error> {
        let (command, response) = command::GetAttrs::new(fid);
        self.service.send_command(Command::Getattr(command));
        response
    }

    /// `(親, 名前)`で指定されたオブジェクトの属性を取得する.
    pub fn getattr_by_name(&self, req: MdRequest) -> impl Future<Item = MdReply, Error = Error> {
        let (command, response) = command::GetAttrsByName::new(req);
        self.service.send_command(Command::GetattrByName(command));
        response
    }

    /// ディレクトリの一ページ分のエントリ群を読み出す.
    pub fn read_page(
        &self,
        req: MdRequest,
        resume_hash: u64,
    ) -> impl Future<Item = DirPage, Error = Error> {
        let (command, response) = command::ReadDirPage::new(req, resume_hash);
        self.service.send_command(Command::ReadPage(command));
        response
    }

    /// 全ターゲットのファイルシステム統計を集計して返す.
    pub fn statfs(&self, for_mount: bool) -> impl Future<Item = StatFs, Error = Error> {
        let (command, response) = command::GetStatFs::new(for_mount);
        self.service.send_command(Command::Statfs(command));
        response
    }
}
