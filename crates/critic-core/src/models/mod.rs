mod changeset;
mod commit;
mod object;

pub use changeset::{ChangesetLine, ChangesetType, LineType, Operation};
pub use commit::{Commit, Signature};
pub use object::{GITLINK_MODE, Object, ObjectKind, TreeChange, TreeEntry, VersionInfo};
