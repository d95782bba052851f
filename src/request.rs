use crate::dn::Dn;
use crate::engine::{Backend, SequenceKind};
use crate::entry::Entry;
use crate::error::TernError;

/// Control OIDs the core recognises. Any critical control outside this
/// set rejects the whole request.
const RECOGNISED_CONTROLS: &[&str] = &[];

#[derive(Debug, Clone)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Operation {
    Add(Entry),
    Modify(Entry),
    Delete(Dn),
    Rename { old: Dn, new: Dn },
    /// Handled by the external search planner, never by the core.
    Search { base: Dn },
    SequenceNumber(SequenceKind),
    StartTransaction,
    EndTransaction,
    CancelTransaction,
}

#[derive(Debug)]
pub struct Request {
    pub operation: Operation,
    pub controls: Vec<Control>,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            controls: Vec::new(),
        }
    }

    pub fn with_control(mut self, oid: &str, critical: bool, data: Vec<u8>) -> Self {
        self.controls.push(Control {
            oid: oid.to_string(),
            critical,
            data,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Init,
    Pending,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    SequenceNumber(u64),
}

/// Outcome of one dispatched request. The handle always reaches `Done`,
/// whatever the result.
#[derive(Debug)]
pub struct RequestHandle {
    pub state: HandleState,
    pub result: Result<Reply, TernError>,
}

pub type Continuation<'a> = Box<dyn FnOnce(&Result<Reply, TernError>) + 'a>;

/// Translates a request into engine calls. The continuation, when
/// supplied, is invoked exactly once with the outcome.
pub(crate) fn dispatch(
    backend: &mut Backend,
    req: Request,
    callback: Option<Continuation<'_>>,
) -> RequestHandle {
    let mut handle = RequestHandle {
        state: HandleState::Init,
        result: Ok(Reply::Done),
    };

    if let Some(ctrl) = req
        .controls
        .iter()
        .find(|c| c.critical && !RECOGNISED_CONTROLS.contains(&c.oid.as_str()))
    {
        handle.result = Err(TernError::UnsupportedCriticalExtension(ctrl.oid.clone()));
        handle.state = HandleState::Done;
        if let Some(cb) = callback {
            cb(&handle.result);
        }
        return handle;
    }

    handle.state = HandleState::Pending;
    handle.result = match req.operation {
        Operation::Add(msg) => backend.add(&msg).map(|()| Reply::Done),
        Operation::Modify(msg) => backend.modify(&msg).map(|()| Reply::Done),
        Operation::Delete(dn) => backend.delete(&dn).map(|()| Reply::Done),
        Operation::Rename { old, new } => backend.rename(&old, &new).map(|()| Reply::Done),
        Operation::Search { base } => Err(TernError::Operations(format!(
            "search below {base} is handled by the external planner"
        ))),
        Operation::SequenceNumber(kind) => {
            backend.sequence_number(kind).map(Reply::SequenceNumber)
        }
        Operation::StartTransaction => backend.start_transaction().map(|()| Reply::Done),
        Operation::EndTransaction => backend.end_transaction().map(|()| Reply::Done),
        Operation::CancelTransaction => backend.cancel_transaction().map(|()| Reply::Done),
    };
    handle.state = HandleState::Done;
    if let Some(cb) = callback {
        cb(&handle.result);
    }
    handle
}
