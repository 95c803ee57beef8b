// Group selection: list the user's groups, validate the chosen ID and
// switch the session to it.

use crate::error::{ImportError, Result};
use crate::session::{Group, RemoteSession};
use indexmap::IndexMap;
use tracing::info;

/// Ordered mapping of group ID to group name, in the order the server
/// listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDirectory {
    groups: IndexMap<i64, String>,
}

impl GroupDirectory {
    /// Fetch the groups the session's identity is a member of.
    pub fn fetch<S: RemoteSession + ?Sized>(session: &S) -> Result<Self> {
        Ok(session.list_groups()?.into_iter().collect())
    }

    pub fn contains(&self, group_id: i64) -> bool {
        self.groups.contains_key(&group_id)
    }

    pub fn name(&self, group_id: i64) -> Option<&str> {
        self.groups.get(&group_id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.groups.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// One `ID: {id} - {name}` line per group.
    pub fn listing(&self) -> String {
        self.iter()
            .map(|(id, name)| format!("ID: {} - {}", id, name))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Switch `session` to `selected`. An ID that is not listed here is
    /// rejected before any request reaches the server.
    pub fn switch<S: RemoteSession + ?Sized>(
        &self,
        session: &mut S,
        selected: Option<i64>,
    ) -> Result<i64> {
        let group_id = match selected {
            Some(id) if self.contains(id) => id,
            other => return Err(ImportError::InvalidGroup(other)),
        };
        let previous = session.active_group();
        session.set_active_group(group_id)?;
        info!(
            group_id,
            ?previous,
            name = self.name(group_id),
            "switched active group"
        );
        println!("Successfully switched to group with ID {}.", group_id);
        Ok(group_id)
    }
}

impl FromIterator<Group> for GroupDirectory {
    fn from_iter<I: IntoIterator<Item = Group>>(iter: I) -> Self {
        GroupDirectory {
            groups: iter.into_iter().map(|g| (g.id, g.name)).collect(),
        }
    }
}
