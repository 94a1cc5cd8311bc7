//! Darc documents: versioned rule sets with hash-chained evolution.

use crate::errors::DarcError;
use crate::expression::Expression;
use crate::identity::Identity;
use crate::{DarcResolver, Signer};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::CanonicalHasher;
use shared_types::{DarcId, Hash, SignatureBytes};
use std::collections::{BTreeMap, HashSet};

/// Action granting plain signature authority; `darc:` identities delegate
/// through this rule.
pub const ACTION_SIGN: &str = "_sign";

/// Action guarding evolution to the next version.
pub const ACTION_EVOLVE: &str = "invoke:evolve";

/// Delegation chains longer than this are rejected as cyclic.
const MAX_DELEGATION_DEPTH: usize = 10;

/// Rule set: action name to expression source. Iteration order is the
/// sorted action order, which makes the darc hash canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rules {
    map: BTreeMap<String, String>,
}

impl Rules {
    /// The standard initial rule set: owners may evolve, signers may sign.
    pub fn initial(owners: &[Identity], signers: &[Identity]) -> Rules {
        let owner_ids: Vec<String> = owners.iter().map(|id| id.to_string()).collect();
        let signer_ids: Vec<String> = signers.iter().map(|id| id.to_string()).collect();
        let mut map = BTreeMap::new();
        map.insert(
            ACTION_EVOLVE.to_string(),
            Expression::all_of(&owner_ids).to_string(),
        );
        map.insert(
            ACTION_SIGN.to_string(),
            Expression::any_of(&signer_ids).to_string(),
        );
        Rules { map }
    }

    pub fn add(&mut self, action: impl Into<String>, expression: impl Into<String>) {
        self.map.insert(action.into(), expression.into());
    }

    pub fn get(&self, action: &str) -> Option<&str> {
        self.map.get(action).map(String::as_str)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.map.contains_key(action)
    }

    /// The `_sign` expression source, reused as default for new actions.
    pub fn sign_expression(&self) -> Option<&str> {
        self.get(ACTION_SIGN)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A signature endorsing one darc version, made by an identity satisfying
/// the previous version's evolve rule.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DarcSignature {
    pub signer: Identity,
    #[serde_as(as = "Bytes")]
    pub signature: SignatureBytes,
}

/// A versioned access-control document.
///
/// The hash covers version, description, previous hash and rules; the base
/// id (identity of the whole chain of versions) and the endorsement
/// signatures stay outside of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Darc {
    pub version: u64,
    pub description: Vec<u8>,
    pub base_id: DarcId,
    pub prev_hash: Hash,
    pub rules: Rules,
    pub signatures: Vec<DarcSignature>,
}

impl Darc {
    /// A fresh version-0 darc.
    pub fn new(rules: Rules, description: impl Into<Vec<u8>>) -> Darc {
        Darc {
            version: 0,
            description: description.into(),
            base_id: DarcId::default(),
            prev_hash: [0u8; 32],
            rules,
            signatures: Vec::new(),
        }
    }

    /// Canonical hash of this version.
    pub fn hash(&self) -> Hash {
        let mut hasher = CanonicalHasher::new();
        hasher.u64(self.version);
        hasher.field(&self.description);
        hasher.fixed(&self.prev_hash);
        for (action, expression) in self.rules.iter() {
            hasher.field(action.as_bytes());
            hasher.field(expression.as_bytes());
        }
        hasher.finish()
    }

    /// Identity of the whole darc chain: the hash of version 0.
    pub fn base_id(&self) -> DarcId {
        if self.version == 0 {
            DarcId(self.hash())
        } else {
            self.base_id
        }
    }

    /// Turn this copy into the successor of `previous`: bump the version,
    /// chain the hash, keep the base id. Rules may be edited before or
    /// after; signatures are reset.
    pub fn evolve_from(&mut self, previous: &Darc) {
        self.version = previous.version + 1;
        self.prev_hash = previous.hash();
        self.base_id = previous.base_id();
        self.signatures.clear();
    }

    /// Endorse this version with `signer`. Call after all rule edits.
    pub fn sign_evolution(&mut self, signer: &Signer) {
        let digest = self.hash();
        self.signatures.push(DarcSignature {
            signer: signer.identity(),
            signature: signer.sign(&digest),
        });
    }

    /// Check that `new` is a valid successor of `self`: version increases by
    /// exactly one, the hash chain holds, the base id is stable, and the
    /// attached signatures satisfy this version's evolve rule.
    pub fn verify_evolution(
        &self,
        new: &Darc,
        resolver: &dyn DarcResolver,
    ) -> Result<(), DarcError> {
        if new.version != self.version + 1 {
            return Err(DarcError::InvalidEvolution(format!(
                "version {} does not follow {}",
                new.version, self.version
            )));
        }
        if new.prev_hash != self.hash() {
            return Err(DarcError::InvalidEvolution(
                "previous-hash does not chain".into(),
            ));
        }
        if new.base_id() != self.base_id() {
            return Err(DarcError::InvalidEvolution("base id changed".into()));
        }
        evaluate_request(
            self,
            ACTION_EVOLVE,
            &new.hash(),
            &new.signatures,
            resolver,
        )
    }
}

/// Check that `signatures` over `digest` satisfy `darc.rules[action]`.
///
/// Every signature must verify under its claimed identity; the set of
/// verified identity strings is then evaluated against the rule
/// expression, resolving `darc:` identities through `resolver`.
pub fn evaluate_request(
    darc: &Darc,
    action: &str,
    digest: &[u8],
    signatures: &[DarcSignature],
    resolver: &dyn DarcResolver,
) -> Result<(), DarcError> {
    let mut matched = HashSet::new();
    for sig in signatures {
        sig.signer.verify(digest, &sig.signature)?;
        matched.insert(sig.signer.to_string());
    }

    let source = darc
        .rules
        .get(action)
        .ok_or_else(|| DarcError::RuleNotFound(action.to_string()))?;
    let expression = Expression::parse(source)?;

    if evaluate_expression(&expression, &matched, resolver, MAX_DELEGATION_DEPTH)? {
        Ok(())
    } else {
        Err(DarcError::NotAuthorized {
            action: action.to_string(),
        })
    }
}

fn evaluate_expression(
    expression: &Expression,
    matched: &HashSet<String>,
    resolver: &dyn DarcResolver,
    depth: usize,
) -> Result<bool, DarcError> {
    match expression {
        Expression::Identity(id) => identity_satisfied(id, matched, resolver, depth),
        Expression::And(a, b) => Ok(evaluate_expression(a, matched, resolver, depth)?
            && evaluate_expression(b, matched, resolver, depth)?),
        Expression::Or(a, b) => Ok(evaluate_expression(a, matched, resolver, depth)?
            || evaluate_expression(b, matched, resolver, depth)?),
        Expression::Threshold { k, identities } => {
            if *k == 0 || identities.is_empty() {
                return Ok(false);
            }
            let mut hit = 0;
            for id in identities {
                if identity_satisfied(id, matched, resolver, depth)? {
                    hit += 1;
                }
            }
            Ok(hit >= *k)
        }
    }
}

fn identity_satisfied(
    identity: &str,
    matched: &HashSet<String>,
    resolver: &dyn DarcResolver,
    depth: usize,
) -> Result<bool, DarcError> {
    if matched.contains(identity) {
        return Ok(true);
    }
    // Delegation: a darc identity is satisfied when the present signers
    // satisfy that darc's signing rule.
    if let Some(Identity::Darc { id }) = Identity::parse(identity) {
        if depth == 0 {
            return Err(DarcError::DelegationTooDeep);
        }
        let Some(delegate) = resolver.resolve(&id) else {
            return Ok(false);
        };
        let Some(source) = delegate.rules.get(ACTION_SIGN) else {
            return Ok(false);
        };
        let expression = Expression::parse(source)?;
        return evaluate_expression(&expression, matched, resolver, depth - 1);
    }
    Ok(false)
}
