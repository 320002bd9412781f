pub mod changeset;
pub mod commit_set;
pub mod git;
pub mod repository;
