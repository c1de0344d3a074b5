//! # Access Policy
//!
//! Capability checks consumed by the graph operations. Identity, sharing and
//! workspaces live outside this crate; the core only asks yes/no questions.

use crate::{BlendError, Capability, Formula, FormulaId, FormulaStatus, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Yes/no capability checks, answered by the surrounding application.
pub trait AccessPolicy: Send + Sync {
    /// May `user` change the ingredients of `formula`?
    fn can_edit(&self, user: UserId, formula: FormulaId) -> bool;

    /// May `user` read `formula` or use it as a compound?
    fn can_read(&self, user: UserId, formula: FormulaId) -> bool;
}

impl<T: AccessPolicy + ?Sized> AccessPolicy for Arc<T> {
    fn can_edit(&self, user: UserId, formula: FormulaId) -> bool {
        (**self).can_edit(user, formula)
    }

    fn can_read(&self, user: UserId, formula: FormulaId) -> bool {
        (**self).can_read(user, formula)
    }
}

impl<T: AccessPolicy + ?Sized> AccessPolicy for &T {
    fn can_edit(&self, user: UserId, formula: FormulaId) -> bool {
        (**self).can_edit(user, formula)
    }

    fn can_read(&self, user: UserId, formula: FormulaId) -> bool {
        (**self).can_read(user, formula)
    }
}

/// Grants everything. For single-user tools and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn can_edit(&self, _user: UserId, _formula: FormulaId) -> bool {
        true
    }

    fn can_read(&self, _user: UserId, _formula: FormulaId) -> bool {
        true
    }
}

/// Explicit grant list.
///
/// Edit implies read. Public formulas are readable by everyone.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    editors: BTreeSet<(UserId, FormulaId)>,
    readers: BTreeSet<(UserId, FormulaId)>,
    public: BTreeSet<FormulaId>,
}

impl AccessList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Owners get edit on their formulas; published formulas are public.
    pub fn from_formulas<'a>(formulas: impl IntoIterator<Item = &'a Formula>) -> Self {
        let mut acl = Self::new();
        for formula in formulas {
            acl.register(formula);
        }
        acl
    }

    /// Apply the registration grants for one formula.
    pub fn register(&mut self, formula: &Formula) -> &mut Self {
        self.editors.insert((formula.owner, formula.id));
        if formula.status == FormulaStatus::Published {
            self.public.insert(formula.id);
        }
        self
    }

    pub fn grant_edit(&mut self, user: UserId, formula: FormulaId) -> &mut Self {
        self.editors.insert((user, formula));
        self
    }

    pub fn grant_read(&mut self, user: UserId, formula: FormulaId) -> &mut Self {
        self.readers.insert((user, formula));
        self
    }

    pub fn publish(&mut self, formula: FormulaId) -> &mut Self {
        self.public.insert(formula);
        self
    }

    pub fn revoke(&mut self, user: UserId, formula: FormulaId) -> &mut Self {
        self.editors.remove(&(user, formula));
        self.readers.remove(&(user, formula));
        self
    }
}

impl AccessPolicy for AccessList {
    fn can_edit(&self, user: UserId, formula: FormulaId) -> bool {
        self.editors.contains(&(user, formula))
    }

    fn can_read(&self, user: UserId, formula: FormulaId) -> bool {
        self.public.contains(&formula)
            || self.readers.contains(&(user, formula))
            || self.can_edit(user, formula)
    }
}

/// Fail with `AccessDenied` unless `user` holds `capability` on `formula`.
pub(crate) fn require<P: AccessPolicy + ?Sized>(
    policy: &P,
    user: UserId,
    formula: FormulaId,
    capability: Capability,
) -> Result<(), BlendError> {
    let allowed = match capability {
        Capability::Read => policy.can_read(user, formula),
        Capability::Edit => policy.can_edit(user, formula),
    };
    if allowed {
        Ok(())
    } else {
        tracing::info!(
            user = user.0,
            formula = formula.0,
            %capability,
            "access denied"
        );
        Err(BlendError::AccessDenied {
            user,
            formula,
            capability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_implies_read() {
        let mut acl = AccessList::new();
        acl.grant_edit(UserId(1), FormulaId(10));
        assert!(acl.can_edit(UserId(1), FormulaId(10)));
        assert!(acl.can_read(UserId(1), FormulaId(10)));
        assert!(!acl.can_read(UserId(2), FormulaId(10)));
    }

    #[test]
    fn public_formulas_are_readable_not_editable() {
        let mut acl = AccessList::new();
        acl.publish(FormulaId(3));
        assert!(acl.can_read(UserId(9), FormulaId(3)));
        assert!(!acl.can_edit(UserId(9), FormulaId(3)));
    }

    #[test]
    fn registration_grants_owner_edit() {
        let formulas = [
            Formula::new(FormulaId(1), "Private", UserId(1)),
            Formula::new(FormulaId(2), "Shared", UserId(1)).with_status(FormulaStatus::Published),
        ];
        let acl = AccessList::from_formulas(&formulas);
        assert!(acl.can_edit(UserId(1), FormulaId(1)));
        assert!(!acl.can_read(UserId(2), FormulaId(1)));
        assert!(acl.can_read(UserId(2), FormulaId(2)));
        assert!(!acl.can_edit(UserId(2), FormulaId(2)));
    }

    #[test]
    fn revoke_removes_grants() {
        let mut acl = AccessList::new();
        acl.grant_edit(UserId(1), FormulaId(1))
            .grant_read(UserId(1), FormulaId(2));
        acl.revoke(UserId(1), FormulaId(1));
        assert!(!acl.can_read(UserId(1), FormulaId(1)));
        assert!(acl.can_read(UserId(1), FormulaId(2)));
    }

    #[test]
    fn require_maps_to_access_denied() {
        let acl = AccessList::new();
        let err = require(&acl, UserId(1), FormulaId(1), Capability::Edit).expect_err("denied");
        assert!(matches!(
            err,
            BlendError::AccessDenied {
                capability: Capability::Edit,
                ..
            }
        ));
        assert!(require(&AllowAll, UserId(1), FormulaId(1), Capability::Edit).is_ok());
    }
}
