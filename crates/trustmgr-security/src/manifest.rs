// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application manifests: the permissions an application declares it needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trustmgr_core::error::{Result, TrustError};

use crate::integrity;
use crate::policy::{ActionMask, Member, MemberType, Rule};

/// `(interface, object path, member, member type)`.
type PermissionKey = (String, String, String, MemberType);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub rules: Vec<Rule>,
}

impl Manifest {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(|rule| rule.members.is_empty())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(TrustError::InvalidArgument("empty manifest encoding".into()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn digest(&self) -> Result<[u8; 32]> {
        Ok(integrity::digest(&self.to_bytes()?))
    }

    /// Normalized view: one entry per member, masks of repeated members OR'd.
    pub fn permissions(&self) -> BTreeMap<PermissionKey, ActionMask> {
        let mut map = BTreeMap::new();
        for rule in &self.rules {
            for member in &rule.members {
                let key = (
                    rule.interface_name.clone(),
                    rule.object_path.clone(),
                    member.name.clone(),
                    member.member_type,
                );
                *map.entry(key).or_insert(ActionMask::DENY) |= member.action_mask;
            }
        }
        map
    }

    /// Same permissions regardless of rule order or how rules are split.
    pub fn is_equivalent(&self, other: &Manifest) -> bool {
        self.permissions() == other.permissions()
    }

    /// The permissions in `self` that `other` does not grant.
    pub fn difference(&self, other: &Manifest) -> Manifest {
        let granted = other.permissions();
        let mut grouped: BTreeMap<(String, String), Vec<Member>> = BTreeMap::new();

        for ((interface, path, name, member_type), mask) in self.permissions() {
            let covered = granted
                .get(&(interface.clone(), path.clone(), name.clone(), member_type))
                .copied()
                .unwrap_or(ActionMask::DENY);
            let extra = mask.without(covered);
            if !extra.is_deny() {
                grouped
                    .entry((interface, path))
                    .or_default()
                    .push(Member::new(name, member_type, extra));
            }
        }

        Manifest::new(
            grouped
                .into_iter()
                .map(|((interface, path), members)| Rule::new(interface, path, members))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(interface: &str, members: &[(&str, MemberType, ActionMask)]) -> Rule {
        Rule::new(
            interface,
            "/",
            members
                .iter()
                .map(|(name, ty, mask)| Member::new(*name, *ty, *mask))
                .collect(),
        )
    }

    fn sample() -> Manifest {
        Manifest::new(vec![
            rule(
                "org.example.Lamp",
                &[
                    ("On", MemberType::MethodCall, ActionMask::MODIFY),
                    ("Level", MemberType::Property, ActionMask::OBSERVE | ActionMask::MODIFY),
                ],
            ),
            rule("org.example.Sensor", &[("Changed", MemberType::Signal, ActionMask::OBSERVE)]),
        ])
    }

    #[test]
    fn permuted_manifest_is_equivalent() {
        let mut permuted = sample();
        permuted.rules.reverse();
        permuted.rules[1].members.reverse();

        assert!(sample().is_equivalent(&permuted));
        assert!(sample().difference(&permuted).is_empty());
        assert!(permuted.difference(&sample()).is_empty());
    }

    #[test]
    fn split_rules_are_equivalent() {
        let split = Manifest::new(vec![
            rule("org.example.Lamp", &[("On", MemberType::MethodCall, ActionMask::MODIFY)]),
            rule("org.example.Sensor", &[("Changed", MemberType::Signal, ActionMask::OBSERVE)]),
            rule("org.example.Lamp", &[("Level", MemberType::Property, ActionMask::OBSERVE)]),
            rule("org.example.Lamp", &[("Level", MemberType::Property, ActionMask::MODIFY)]),
        ]);
        assert!(split.is_equivalent(&sample()));
        assert!(split.difference(&sample()).is_empty());
    }

    #[test]
    fn difference_reports_extra_actions_only() {
        let requested = Manifest::new(vec![rule(
            "org.example.Lamp",
            &[
                ("On", MemberType::MethodCall, ActionMask::MODIFY | ActionMask::PROVIDE),
                ("Level", MemberType::Property, ActionMask::OBSERVE),
                ("Color", MemberType::Property, ActionMask::OBSERVE),
            ],
        )]);

        let diff = requested.difference(&sample());
        assert_eq!(diff.rules.len(), 1);
        let members = &diff.rules[0].members;
        assert_eq!(members.len(), 2);
        assert!(members.contains(&Member::new("Color", MemberType::Property, ActionMask::OBSERVE)));
        assert!(members.contains(&Member::new("On", MemberType::MethodCall, ActionMask::PROVIDE)));
    }

    #[test]
    fn empty_encoding_is_rejected() {
        assert!(matches!(Manifest::from_bytes(&[]), Err(TrustError::InvalidArgument(_))));
        let restored = Manifest::from_bytes(&sample().to_bytes().unwrap()).unwrap();
        assert_eq!(restored, sample());
        assert_eq!(restored.digest().unwrap(), sample().digest().unwrap());
    }
}
