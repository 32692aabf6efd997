//! Sender credentials and the credential store seam.

use std::fmt;

use rbus_proto::names::{BUS_DRIVER, BUS_DRIVER_PATH};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::procfs::ProcFs;

bitflags::bitflags! {
    /// Which credential fields are populated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CredsMask: u64 {
        /// Process id.
        const PID = 1 << 0;
        /// Thread id.
        const TID = 1 << 1;
        /// Real user id.
        const UID = 1 << 2;
        /// Real group id.
        const GID = 1 << 3;
        /// Process name (`comm`).
        const COMM = 1 << 4;
        /// Thread name.
        const TID_COMM = 1 << 5;
        /// Executable path.
        const EXE = 1 << 6;
        /// Command line.
        const CMDLINE = 1 << 7;
        /// Security label.
        const SELINUX_CONTEXT = 1 << 8;
        /// Unique bus name of the sender.
        const UNIQUE_NAME = 1 << 9;
    }
}

/// Identity attributes of a peer; each field is valid only when its
/// [`CredsMask`] bit is set.
///
/// Built once, then shared immutably as `Arc<Creds>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Creds {
    /// Populated fields.
    mask: CredsMask,
    /// Process id.
    pid: u32,
    /// Thread id.
    tid: u32,
    /// Real user id.
    uid: u32,
    /// Real group id.
    gid: u32,
    /// Process name.
    comm: String,
    /// Thread name.
    tid_comm: String,
    /// Executable path.
    exe: String,
    /// Command line arguments.
    cmdline: Vec<String>,
    /// Security label.
    label: String,
    /// Unique bus name.
    unique_name: String,
}

macro_rules! creds_field {
    ($get:ident, $with:ident, $field:ident, $bit:ident, copy $ty:ty) => {
        #[doc = concat!("Returns the `", stringify!($field), "` field if populated.")]
        pub fn $get(&self) -> Option<$ty> {
            self.mask.contains(CredsMask::$bit).then_some(self.$field)
        }

        #[doc = concat!("Sets the `", stringify!($field), "` field.")]
        #[must_use]
        pub fn $with(mut self, v: $ty) -> Self {
            self.$field = v;
            self.mask |= CredsMask::$bit;
            self
        }
    };
    ($get:ident, $with:ident, $field:ident, $bit:ident, str) => {
        #[doc = concat!("Returns the `", stringify!($field), "` field if populated.")]
        pub fn $get(&self) -> Option<&str> {
            self.mask
                .contains(CredsMask::$bit)
                .then_some(self.$field.as_str())
        }

        #[doc = concat!("Sets the `", stringify!($field), "` field.")]
        #[must_use]
        pub fn $with(mut self, v: impl Into<String>) -> Self {
            self.$field = v.into();
            self.mask |= CredsMask::$bit;
            self
        }
    };
}

impl Creds {
    /// Creates empty credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populated fields.
    pub const fn mask(&self) -> CredsMask {
        self.mask
    }

    /// Returns `true` if every field in `mask` is populated.
    pub const fn covers(&self, mask: CredsMask) -> bool {
        self.mask.contains(mask)
    }

    creds_field!(pid, with_pid, pid, PID, copy u32);
    creds_field!(tid, with_tid, tid, TID, copy u32);
    creds_field!(uid, with_uid, uid, UID, copy u32);
    creds_field!(gid, with_gid, gid, GID, copy u32);
    creds_field!(comm, with_comm, comm, COMM, str);
    creds_field!(tid_comm, with_tid_comm, tid_comm, TID_COMM, str);
    creds_field!(exe, with_exe, exe, EXE, str);
    creds_field!(selinux_context, with_selinux_context, label, SELINUX_CONTEXT, str);
    creds_field!(unique_name, with_unique_name, unique_name, UNIQUE_NAME, str);

    /// Command line arguments, if populated.
    pub fn cmdline(&self) -> Option<&[String]> {
        self.mask
            .contains(CredsMask::CMDLINE)
            .then_some(self.cmdline.as_slice())
    }

    /// Sets the command line.
    #[must_use]
    pub fn with_cmdline(mut self, args: Vec<String>) -> Self {
        self.cmdline = args;
        self.mask |= CredsMask::CMDLINE;
        self
    }

    /// Fills fields missing here from `other`. Fields already present
    /// are kept, so the mask never shrinks.
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        let missing = other.mask - self.mask;
        if missing.contains(CredsMask::PID) {
            self.pid = other.pid;
        }
        if missing.contains(CredsMask::TID) {
            self.tid = other.tid;
        }
        if missing.contains(CredsMask::UID) {
            self.uid = other.uid;
        }
        if missing.contains(CredsMask::GID) {
            self.gid = other.gid;
        }
        if missing.contains(CredsMask::COMM) {
            self.comm.clone_from(&other.comm);
        }
        if missing.contains(CredsMask::TID_COMM) {
            self.tid_comm.clone_from(&other.tid_comm);
        }
        if missing.contains(CredsMask::EXE) {
            self.exe.clone_from(&other.exe);
        }
        if missing.contains(CredsMask::CMDLINE) {
            self.cmdline.clone_from(&other.cmdline);
        }
        if missing.contains(CredsMask::SELINUX_CONTEXT) {
            self.label.clone_from(&other.label);
        }
        if missing.contains(CredsMask::UNIQUE_NAME) {
            self.unique_name.clone_from(&other.unique_name);
        }
        self.mask |= missing;
        self
    }
}

/// Where sender credentials come from when a message does not carry
/// enough of them.
pub trait CredsSource: Send + Sync + fmt::Debug {
    /// Credentials of the current owner of bus name `name`, as far as
    /// the owner lookup itself reports them. Must include the pid.
    fn name_owner(&self, bus: &Bus, name: &str, mask: CredsMask) -> Result<Creds>;

    /// Credentials of the process at the other end of the connection,
    /// as reported by the transport. Must include the pid.
    fn peer(&self, bus: &Bus, mask: CredsMask) -> Result<Creds>;

    /// Derives the fields in `mask` missing from `base` from its process
    /// id. The result must keep every field of `base`.
    fn extend_by_pid(&self, base: &Creds, mask: CredsMask) -> Result<Creds>;
}

/// Default credential store: asks the bus driver for name owners, the
/// transport for peer credentials and `/proc` for everything else.
#[derive(Debug, Default)]
pub struct SystemCreds {
    /// Process information source.
    proc: ProcFs,
}

impl SystemCreds {
    /// Uses `proc` instead of `/proc`.
    pub const fn with_procfs(proc: ProcFs) -> Self {
        Self { proc }
    }

    /// Issues one bus driver query taking a bus name.
    fn driver_call(bus: &Bus, member: &str, name: &str) -> Result<crate::Message> {
        bus.call_method(
            Some(BUS_DRIVER),
            BUS_DRIVER_PATH,
            Some(BUS_DRIVER),
            member,
            "s",
            &[name.into()],
        )
    }
}

impl CredsSource for SystemCreds {
    fn name_owner(&self, bus: &Bus, name: &str, mask: CredsMask) -> Result<Creds> {
        let pid = Self::driver_call(bus, "GetConnectionUnixProcessID", name)?.read_basic::<u32>()?;
        let mut creds = Creds::new().with_pid(pid);

        if mask.contains(CredsMask::UID) {
            let uid = Self::driver_call(bus, "GetConnectionUnixUser", name)?.read_basic::<u32>()?;
            creds = creds.with_uid(uid);
        }
        if mask.contains(CredsMask::UNIQUE_NAME) {
            creds = if name.starts_with(':') {
                creds.with_unique_name(name)
            } else {
                let mut reply = Self::driver_call(bus, "GetNameOwner", name)?;
                creds.with_unique_name(reply.read_str()?)
            };
        }
        Ok(creds)
    }

    fn peer(&self, bus: &Bus, _mask: CredsMask) -> Result<Creds> {
        let creds = bus.transport().peer_credentials()?;
        if creds.pid().is_none() {
            return Err(Error::NotSupported("peer did not report a process id"));
        }
        Ok(creds)
    }

    fn extend_by_pid(&self, base: &Creds, mask: CredsMask) -> Result<Creds> {
        self.proc.extend(base, mask)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use rbus_proto::Value;

    use super::*;
    use crate::mock::{Canned, MockTransport};

    fn fake_proc(pid: u32, comm: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
        root
    }

    fn system_bus(mock: &MockTransport, proc: &tempfile::TempDir) -> Bus {
        Bus::builder()
            .transport(mock.clone())
            .creds_source(SystemCreds::with_procfs(ProcFs::new(proc.path())))
            .build()
            .unwrap()
    }

    #[test]
    fn getters_follow_mask() {
        let c = Creds::new().with_pid(10).with_comm("sshd");
        assert_eq!(c.pid(), Some(10));
        assert_eq!(c.comm(), Some("sshd"));
        assert_eq!(c.uid(), None);
        assert_eq!(c.cmdline(), None);
        assert!(c.covers(CredsMask::PID | CredsMask::COMM));
        assert!(!c.covers(CredsMask::PID | CredsMask::UID));
    }

    #[test]
    fn merge_keeps_existing_fields() {
        let cached = Creds::new().with_pid(10).with_uid(1000);
        let fetched = Creds::new().with_pid(99).with_uid(0).with_gid(5);
        let merged = cached.clone().merged(&fetched);
        assert_eq!(merged.pid(), Some(10));
        assert_eq!(merged.uid(), Some(1000));
        assert_eq!(merged.gid(), Some(5));
        assert!(merged.mask().contains(cached.mask()));
    }

    #[test]
    fn name_owner_asks_only_the_driver() {
        // No process directory: the lookup must not touch procfs.
        let proc = tempfile::tempdir().unwrap();
        let mock = MockTransport::default();
        mock.push(Canned::Return(vec![Value::Uint32(42)]));
        mock.push(Canned::Return(vec![Value::Uint32(1000)]));
        mock.push(Canned::Return(vec![":1.7".into()]));
        let bus = system_bus(&mock, &proc);

        let mask = CredsMask::PID | CredsMask::UID | CredsMask::COMM | CredsMask::UNIQUE_NAME;
        let c = SystemCreds::with_procfs(ProcFs::new(proc.path()))
            .name_owner(&bus, "org.example.Svc", mask)
            .unwrap();
        assert_eq!(c.pid(), Some(42));
        assert_eq!(c.uid(), Some(1000));
        assert_eq!(c.comm(), None);
        assert_eq!(c.unique_name(), Some(":1.7"));

        let members: Vec<_> = mock
            .calls()
            .iter()
            .map(|f| f.header.member.clone().unwrap())
            .collect();
        assert_eq!(
            members,
            ["GetConnectionUnixProcessID", "GetConnectionUnixUser", "GetNameOwner"]
        );
        assert_eq!(mock.calls()[0].header.destination.as_deref(), Some(BUS_DRIVER));
    }

    #[test]
    fn unique_sender_needs_no_owner_lookup() {
        let proc = fake_proc(42, "svcd");
        let mock = MockTransport::default();
        mock.push(Canned::Return(vec![Value::Uint32(42)]));
        let bus = system_bus(&mock, &proc);
        let c = SystemCreds::default()
            .name_owner(&bus, ":1.7", CredsMask::PID | CredsMask::UNIQUE_NAME)
            .unwrap();
        assert_eq!(c.unique_name(), Some(":1.7"));
        assert_eq!(mock.calls().len(), 1);
    }

    #[test]
    fn peer_uses_transport_credentials() {
        let proc = fake_proc(9, "peerd");
        let mock = MockTransport::default();
        let bus = system_bus(&mock, &proc);
        let source = SystemCreds::with_procfs(ProcFs::new(proc.path()));

        assert!(matches!(
            source.peer(&bus, CredsMask::PID),
            Err(Error::NotSupported(_))
        ));
        mock.set_peer(Creds::new().with_pid(9).with_uid(5));
        let c = source.peer(&bus, CredsMask::PID | CredsMask::COMM).unwrap();
        assert_eq!(c.uid(), Some(5));
        assert_eq!(c.comm(), None);
        let c = source.extend_by_pid(&c, CredsMask::PID | CredsMask::COMM).unwrap();
        assert_eq!(c.comm(), Some("peerd"));
        assert_eq!(mock.traffic(), 0);
    }
}
