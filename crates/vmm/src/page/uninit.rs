//! Pages that have never been touched.
//!
//! An uninitialized page only records what it should become. The first claim swaps the
//! payload for the target kind's and lets that kind fill the frame, so the transition happens
//! exactly once even if loading fails and the fault is retried.

use core::mem;

use super::{AnonPage, Backing, FilePage, Loader, Page, PageKind, PageOperations, Region};
use crate::{error::VmError, page_directory::PageDirectory, vm::VirtualMemory};

pub(super) static OPERATIONS: PageOperations = PageOperations {
    kind: PageKind::Uninit,
    swap_in,
    swap_out,
    destroy,
};

#[derive(Clone)]
enum Target {
    Anon(Option<Loader>),
    File(FilePage),
}

/// Payload of an uninitialized page.
#[derive(Clone)]
pub struct UninitPage {
    target: Target,
}

impl UninitPage {
    /// Becomes an anonymous page, filled by `loader` or zeroed.
    pub(crate) fn anon(loader: Option<Loader>) -> Self {
        Self {
            target: Target::Anon(loader),
        }
    }

    /// Becomes the file-backed page `file`.
    pub(crate) fn file(file: FilePage) -> Self {
        Self {
            target: Target::File(file),
        }
    }

    /// The kind this page becomes when claimed.
    pub fn target(&self) -> PageKind {
        match self.target {
            Target::Anon(_) => PageKind::Anon,
            Target::File(_) => PageKind::File,
        }
    }

    pub(crate) fn region(&self) -> Option<Region> {
        match &self.target {
            Target::File(file) => Some(file.region()),
            Target::Anon(_) => None,
        }
    }
}

fn swap_in(page: &mut Page, vm: &VirtualMemory, buf: &mut [u8]) -> Result<(), VmError> {
    let placeholder = Backing::Anon(AnonPage::zeroed());
    let Backing::Uninit(uninit) = mem::replace(&mut page.backing, placeholder) else {
        panic!("uninitialized page operation on an initialized page");
    };

    page.backing = match uninit.target {
        Target::Anon(Some(loader)) => Backing::Anon(AnonPage::lazy(loader)),
        Target::Anon(None) => Backing::Anon(AnonPage::zeroed()),
        Target::File(file) => Backing::File(file),
    };
    log::trace!("initializing {} as {:?}", page.va(), page.kind());

    page.swap_in(vm, buf)
}

fn swap_out(page: &mut Page, _vm: &VirtualMemory, _directory: &mut PageDirectory) -> Result<(), VmError> {
    panic!("uninitialized page {} cannot be resident", page.va());
}

fn destroy(_page: &mut Page, _vm: &VirtualMemory, _directory: &spin::Mutex<PageDirectory>) {}
