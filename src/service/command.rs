//! サービスに発行されるコマンド群の定義.
use fibers::sync::oneshot;
use futures::{Future, Poll};
use std::sync::mpsc::{Receiver, Sender};
use trackable::error::ErrorKindExt;

use crate::dir::DirPage;
use crate::fid::Fid;
use crate::op::{MdReply, MdRequest, StatFs};
use crate::{Error, ErrorKind, Result};

pub type CommandSender = Sender<Command>;
pub type CommandReceiver = Receiver<Command>;

#[derive(Debug)]
pub enum Command {
    Create(CreateObject),
    Link(LinkObject),
    Unlink(UnlinkObject),
    Rename(RenameObject),
    Getattr(GetAttrs),
    GetattrByName(GetAttrsByName),
    ReadPage(ReadDirPage),
    Statfs(GetStatFs),
    Stop(StopService),
}

/// `Result`の非同期版.
#[derive(Debug)]
pub struct AsyncResult<T>(oneshot::Monitor<T, Error>);
impl<T> AsyncResult<T> {
    fn new() -> (AsyncReply<T>, Self) {
        let (tx, rx) = oneshot::monitor();
        (AsyncReply(tx), AsyncResult(rx))
    }
}
impl<T> Future for AsyncResult<T> {
    type Item = T;
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        track!(self.0.poll().map_err(|e| e.unwrap_or_else(|| {
            ErrorKind::Other
                .cause("monitoring channel disconnected")
                .into()
        })))
    }
}

#[derive(Debug)]
pub struct AsyncReply<T>(oneshot::Monitored<T, Error>);
impl<T> AsyncReply<T> {
    pub fn send(self, result: Result<T>) {
        self.0.exit(result);
    }
}

#[derive(Debug)]
pub struct CreateObject {
    pub req: MdRequest,
    pub reply: AsyncReply<MdReply>,
}
impl CreateObject {
    pub fn new(req: MdRequest) -> (Self, AsyncResult<MdReply>) {
        let (reply, result) = AsyncResult::new();
        (CreateObject { req, reply }, result)
    }
}

#[derive(Debug)]
pub struct LinkObject {
    pub req: MdRequest,
    pub reply: AsyncReply<MdReply>,
}
impl LinkObject {
    pub fn new(req: MdRequest) -> (Self, AsyncResult<MdReply>) {
        let (reply, result) = AsyncResult::new();
        (LinkObject { req, reply }, result)
    }
}

#[derive(Debug)]
pub struct UnlinkObject {
    pub req: MdRequest,
    pub reply: AsyncReply<MdReply>,
}
impl UnlinkObject {
    pub fn new(req: MdRequest) -> (Self, AsyncResult<MdReply>) {
        let (reply, result) = AsyncResult::new();
        (UnlinkObject { req, reply }, result)
    }
}

#[derive(Debug)]
pub struct RenameObject {
    pub req: MdRequest,
    pub reply: AsyncReply<MdReply>,
}
impl RenameObject {
    pub fn new(req: MdRequest) -> (Self, AsyncResult<MdReply>) {
        let (reply, result) = AsyncResult::new();
        (RenameObject { req, reply }, result)
    }
}

#[derive(Debug)]
pub struct GetAttrs {
    pub fid: Fid,
    pub reply: AsyncReply<MdReply>,
}
impl GetAttrs {
    pub fn new(fid: Fid) -> (Self, AsyncResult<MdReply>) {
        let (reply, result) = AsyncResult::new();
        (GetAttrs { fid, reply }, result)
    }
}

#[derive(Debug)]
pub struct GetAttrsByName {
    pub req: MdRequest,
    pub reply: AsyncReply<MdReply>,
}
impl GetAttrsByName {
    pub fn new(req: MdRequest) -> (Self, AsyncResult<MdReply>) {
        let (reply, result) = AsyncResult::new();
        (GetAttrsByName { req, reply }, result)
    }
}

#[derive(Debug)]
pub struct ReadDirPage {
    pub req: MdRequest,
    pub resume_hash: u64,
    pub reply: AsyncReply<DirPage>,
}
impl ReadDirPage {
    pub fn new(req: MdRequest, resume_hash: u64) -> (Self, AsyncResult<DirPage>) {
        let (reply, result) = AsyncResult::new();
        (
            ReadDirPage {
                req,
                resume_hash,
                reply,
            },
            result,
        )
    }
}

#[derive(Debug)]
pub struct GetStatFs {
    pub for_mount: bool,
    pub reply: AsyncReply<StatFs>,
}
impl GetStatFs {
    pub fn new(for_mount: bool) -> (Self, AsyncResult<StatFs>) {
        let (reply, result) = AsyncResult::new();
        (GetStatFs { for_mount, reply }, result)
    }
}

#[derive(Debug)]
pub struct StopService;
