// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Default permission policy generation.
//
// ACL order is part of the contract: deny, then admin, then one ACL per
// member group in the order supplied.

use tracing::{debug, instrument};
use trustmgr_core::error::{Result, TrustError};
use trustmgr_core::types::{GroupInfo, PublicKey};

use crate::policy::{Acl, ActionMask, Peer, PermissionPolicy, Rule};

/// Assembles default policies for one deployment.
#[derive(Debug, Clone)]
pub struct PolicyGenerator {
    admin_group: Option<GroupInfo>,
    deny_list: Vec<PublicKey>,
}

impl PolicyGenerator {
    pub fn new(admin_group: Option<GroupInfo>, deny_list: Vec<PublicKey>) -> Self {
        Self { admin_group, deny_list }
    }

    pub fn admin_group(&self) -> Option<&GroupInfo> {
        self.admin_group.as_ref()
    }

    /// Build the default policy granting full access to the admin group and
    /// to each of `groups`, after denying everything to the deny list.
    ///
    /// With a non-empty deny list, ACL 0 is the deny ACL. ACL 1 is the admin
    /// ACL only when an admin group is configured; without one the member
    /// groups start right after the deny ACL.
    #[instrument(skip_all, fields(groups = groups.len(), denied = self.deny_list.len()))]
    pub fn default_policy(&self, groups: &[GroupInfo]) -> Result<PermissionPolicy> {
        let mut acls = Vec::with_capacity(groups.len() + 2);

        if !self.deny_list.is_empty() {
            acls.push(Acl {
                peers: self
                    .deny_list
                    .iter()
                    .map(|key| Peer::WithPublicKey { key: key.clone() })
                    .collect(),
                rules: vec![Rule::wildcard(ActionMask::DENY)],
            });
        }

        if let Some(admin) = &self.admin_group {
            acls.push(membership_acl(admin));
        }

        acls.extend(groups.iter().map(membership_acl));

        if acls.is_empty() {
            return Err(TrustError::NoAclsGenerated);
        }

        debug!(acls = acls.len(), "default policy generated");
        Ok(PermissionPolicy::new(acls))
    }
}

fn membership_acl(group: &GroupInfo) -> Acl {
    Acl {
        peers: vec![Peer::WithMembership {
            group: group.guid,
            authority: group.authority.clone(),
        }],
        rules: vec![Rule::wildcard(ActionMask::FULL)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::WILDCARD;

    fn key(seed: u8) -> PublicKey {
        let mut bytes = vec![0x04];
        bytes.extend(std::iter::repeat_n(seed, 64));
        PublicKey::from_sec1(&bytes).unwrap()
    }

    fn group(seed: u8, name: &str) -> GroupInfo {
        GroupInfo::new(key(seed), name, "")
    }

    #[test]
    fn deny_admin_then_groups_in_order() {
        let admin = group(1, "admin");
        let groups = vec![group(2, "a"), group(3, "b"), group(4, "c")];
        let generator = PolicyGenerator::new(Some(admin.clone()), vec![key(9), key(8)]);

        let policy = generator.default_policy(&groups).unwrap();
        assert_eq!(policy.acls.len(), 5);

        let deny = &policy.acls[0];
        assert_eq!(
            deny.peers,
            vec![Peer::WithPublicKey { key: key(9) }, Peer::WithPublicKey { key: key(8) }]
        );
        assert_eq!(deny.rules.len(), 1);
        assert_eq!(deny.rules[0].interface_name, WILDCARD);
        assert_eq!(deny.rules[0].object_path, WILDCARD);
        assert_eq!(deny.rules[0].members.len(), 1);
        assert_eq!(deny.rules[0].members[0].name, WILDCARD);
        assert!(deny.rules[0].members[0].action_mask.is_deny());

        assert_eq!(
            policy.acls[1].peers,
            vec![Peer::WithMembership { group: admin.guid, authority: admin.authority.clone() }]
        );
        assert_eq!(policy.acls[1].rules[0].members[0].action_mask, ActionMask::FULL);

        for (i, g) in groups.iter().enumerate() {
            assert_eq!(
                policy.acls[i + 2].peers,
                vec![Peer::WithMembership { group: g.guid, authority: g.authority.clone() }]
            );
            assert_eq!(policy.acls[i + 2].rules[0].members[0].action_mask, ActionMask::FULL);
        }
    }

    #[test]
    fn admin_first_without_deny_list() {
        let admin = group(1, "admin");
        let generator = PolicyGenerator::new(Some(admin.clone()), Vec::new());
        let policy = generator.default_policy(&[]).unwrap();
        assert_eq!(policy.acls.len(), 1);
        assert!(matches!(
            &policy.acls[0].peers[0],
            Peer::WithMembership { group, .. } if *group == admin.guid
        ));
    }

    #[test]
    fn groups_follow_deny_acl_without_admin() {
        let groups = vec![group(2, "a"), group(3, "b")];
        let generator = PolicyGenerator::new(None, vec![key(9)]);
        let policy = generator.default_policy(&groups).unwrap();
        assert_eq!(policy.acls.len(), 3);
        assert!(matches!(&policy.acls[0].peers[0], Peer::WithPublicKey { .. }));
        for (i, g) in groups.iter().enumerate() {
            assert!(matches!(
                &policy.acls[i + 1].peers[0],
                Peer::WithMembership { group, .. } if *group == g.guid
            ));
        }
    }

    #[test]
    fn empty_configuration_generates_nothing() {
        let generator = PolicyGenerator::new(None, Vec::new());
        assert!(matches!(generator.default_policy(&[]), Err(TrustError::NoAclsGenerated)));
    }

    #[test]
    fn deny_list_alone_is_enough() {
        let generator = PolicyGenerator::new(None, vec![key(5)]);
        let policy = generator.default_policy(&[]).unwrap();
        assert_eq!(policy.acls.len(), 1);
        assert_eq!(policy.version, 0);
    }
}
