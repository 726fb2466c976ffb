use std::ops::{Deref, DerefMut};

use anyhow::{Context, Result};

use crate::store::EngineSession;

/// A session temporarily checked out to another branch.
///
/// `enter` records the session's current branch and checks out the target;
/// `exit` restores the recorded branch. Queries made through the scope see
/// the target branch only. A scope dropped without `exit` (an early return
/// or a cancelled future) cannot restore the checkout asynchronously, so it
/// logs the leak; callers run `exit` on both the success and error path.
pub struct BranchScope<'a, S: EngineSession> {
    session: &'a mut S,
    previous: String,
    branch: String,
    exited: bool,
}

impl<'a, S: EngineSession> BranchScope<'a, S> {
    pub async fn enter(session: &'a mut S, branch: &str) -> Result<Self> {
        let previous = session.active_branch().await?;
        session
            .checkout(branch)
            .await
            .with_context(|| format!("Failed to check out branch '{}'", branch))?;
        Ok(Self {
            session,
            previous,
            branch: branch.to_string(),
            exited: false,
        })
    }

    pub async fn exit(mut self) -> Result<()> {
        self.exited = true;
        if self.previous == self.branch {
            return Ok(());
        }
        self.session
            .checkout(&self.previous)
            .await
            .with_context(|| format!("Failed to restore branch '{}'", self.previous))
    }
}

impl<S: EngineSession> Deref for BranchScope<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session
    }
}

impl<S: EngineSession> DerefMut for BranchScope<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session
    }
}

impl<S: EngineSession> Drop for BranchScope<'_, S> {
    fn drop(&mut self) {
        if !self.exited {
            log::warn!(
                "branch scope for '{}' dropped without restoring '{}'",
                self.branch,
                self.previous
            );
        }
    }
}
