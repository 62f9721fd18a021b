//! User and group namespace identity mappings.

use nix::unistd::{Group, User, getgid, getuid};

use crate::error::{CmdlineError, Result};
use crate::split::split_triple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Uid,
    Gid,
}

impl IdKind {
    /// Real id of the invoking process.
    pub fn current(self) -> u32 {
        match self {
            Self::Uid => getuid().as_raw(),
            Self::Gid => getgid().as_raw(),
        }
    }

    /// Resolves a numeric id or a user/group name.
    pub fn resolve(self, token: &str) -> Option<u32> {
        if let Ok(id) = token.parse::<u32>() {
            return Some(id);
        }
        match self {
            Self::Uid => User::from_name(token).ok().flatten().map(|u| u.uid.as_raw()),
            Self::Gid => Group::from_name(token).ok().flatten().map(|g| g.gid.as_raw()),
        }
    }
}

/// One `inside:outside:count` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapEntry {
    pub inside_id: u32,
    pub outside_id: u32,
    pub count: u32,
    /// Install through the set-uid newuidmap/newgidmap helpers.
    pub is_newidmap: bool,
}

impl IdMapEntry {
    /// 1:1 mapping of the invoking process's own id.
    pub fn identity(kind: IdKind) -> Self {
        let id = kind.current();
        Self {
            inside_id: id,
            outside_id: id,
            count: 1,
            is_newidmap: false,
        }
    }
}

/// Ordered uid and gid mapping lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMaps {
    pub uids: Vec<IdMapEntry>,
    pub gids: Vec<IdMapEntry>,
}

impl IdMaps {
    pub fn list_mut(&mut self, kind: IdKind) -> &mut Vec<IdMapEntry> {
        match kind {
            IdKind::Uid => &mut self.uids,
            IdKind::Gid => &mut self.gids,
        }
    }

    /// Parses `inside[:outside[:count]]` and appends it to the `kind` list.
    ///
    /// A missing outside id maps onto the invoking process's own id; a
    /// missing count is 1.
    pub fn parse_id(
        &mut self,
        directive: &'static str,
        kind: IdKind,
        value: &str,
        is_newidmap: bool,
    ) -> Result<()> {
        let (inside, outside, count) = split_triple(value);
        let invalid = |reason: String| CmdlineError::InvalidIdentity {
            directive,
            value: value.to_string(),
            reason,
        };

        let inside_id = kind
            .resolve(inside)
            .ok_or_else(|| invalid(format!("unknown id '{inside}'")))?;
        let outside_id = match outside {
            Some(token) => kind
                .resolve(token)
                .ok_or_else(|| invalid(format!("unknown id '{token}'")))?,
            None => kind.current(),
        };
        let count = match count {
            Some(token) => match token.parse::<u32>() {
                Ok(0) => return Err(invalid("count must be at least 1".to_string())),
                Ok(n) => n,
                Err(_) => return Err(invalid(format!("invalid count '{token}'"))),
            },
            None => 1,
        };

        self.list_mut(kind).push(IdMapEntry {
            inside_id,
            outside_id,
            count,
            is_newidmap,
        });
        Ok(())
    }

    /// Gives each empty list a single identity mapping.
    pub fn fill_defaults(&mut self) {
        for kind in [IdKind::Uid, IdKind::Gid] {
            let list = self.list_mut(kind);
            if list.is_empty() {
                list.push(IdMapEntry::identity(kind));
            }
        }
    }
}
