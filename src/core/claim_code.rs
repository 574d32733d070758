//! Claim code generation.
//!
//! Codes are drawn from an unambiguous alphabet (no `0/O` or `1/I`) with a
//! cryptographically secure RNG and checked for uniqueness across every code column:
//! gift claim codes and both codes of each Valentine challenge.

use crate::{
    config::PaymentsConfig,
    entities::{ExperienceGift, ValentineChallenge, experience_gift, valentine_challenge},
    errors::{Error, Result},
};
use rand::{Rng, rngs::OsRng};
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use tracing::{debug, warn};

/// Characters a claim code may contain.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Source of candidate codes.
///
/// Production uses [`RandomCodeSource`]; tests script collisions with a deterministic
/// source.
pub trait CodeSource: Send {
    /// Produces one candidate code of `length` characters.
    fn next_code(&mut self, length: usize) -> String;
}

/// Candidate codes from the operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn next_code(&mut self, length: usize) -> String {
        (0..length)
            .map(|_| char::from(CODE_ALPHABET[OsRng.gen_range(0..CODE_ALPHABET.len())]))
            .collect()
    }
}

/// Length and retry budget for code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePolicy {
    /// Characters per code
    pub length: usize,
    /// Candidates drawn before giving up
    pub max_attempts: u32,
}

impl From<&PaymentsConfig> for CodePolicy {
    fn from(config: &PaymentsConfig) -> Self {
        Self {
            length: config.code_length,
            max_attempts: config.max_code_attempts,
        }
    }
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self::from(&PaymentsConfig::default())
    }
}

/// Canonical form of user-entered codes: trimmed and upper-cased.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whether `code` is already used by a gift or either side of a challenge.
pub async fn is_code_in_use<C>(db: &C, code: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    let gifts = ExperienceGift::find()
        .filter(experience_gift::Column::ClaimCode.eq(code))
        .count(db)
        .await?;
    if gifts > 0 {
        return Ok(true);
    }

    let challenges = ValentineChallenge::find()
        .filter(
            Condition::any()
                .add(valentine_challenge::Column::PurchaserCode.eq(code))
                .add(valentine_challenge::Column::PartnerCode.eq(code)),
        )
        .count(db)
        .await?;
    Ok(challenges > 0)
}

/// Draws candidates until one is unused and not in `reserved`.
///
/// `reserved` holds codes handed out earlier in the same transaction that are not
/// persisted yet.
pub async fn generate_unique_code<C>(
    db: &C,
    source: &mut dyn CodeSource,
    policy: CodePolicy,
    reserved: &[String],
) -> Result<String>
where
    C: ConnectionTrait,
{
    for attempt in 1..=policy.max_attempts {
        let candidate = source.next_code(policy.length);
        if reserved.contains(&candidate) || is_code_in_use(db, &candidate).await? {
            debug!(attempt, "Claim code collision, drawing again");
            continue;
        }
        return Ok(candidate);
    }

    warn!(attempts = policy.max_attempts, "Claim code space exhausted");
    Err(Error::CodeGenerationExhausted {
        attempts: policy.max_attempts,
    })
}

/// Generates the two distinct codes of a Valentine challenge.
///
/// The second code is redrawn while it equals the first, within the same attempt budget.
pub async fn generate_code_pair<C>(
    db: &C,
    source: &mut dyn CodeSource,
    policy: CodePolicy,
) -> Result<(String, String)>
where
    C: ConnectionTrait,
{
    let purchaser = generate_unique_code(db, source, policy, &[]).await?;
    let partner = generate_unique_code(db, source, policy, std::slice::from_ref(&purchaser)).await?;
    Ok((purchaser, partner))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_codes_use_alphabet() {
        let mut source = RandomCodeSource;
        let code = source.next_code(12);

        assert_eq!(code.len(), 12);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert!(!code.contains('0') && !code.contains('O'));
        assert!(!code.contains('1') && !code.contains('I'));
    }

    #[test]
    fn test_random_codes_are_distinct() {
        let mut source = RandomCodeSource;
        let codes: HashSet<String> = (0..10_000).map(|_| source.next_code(12)).collect();
        assert_eq!(codes.len(), 10_000);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  abcd2345efgh "), "ABCD2345EFGH");
    }

    #[tokio::test]
    async fn test_collision_redraws_once() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_experience(&db, "exp-1").await?;
        insert_test_gift(&db, "exp-1", "TAKENCODE234", "giver").await?;

        let mut source = ScriptedCodeSource::new(&["TAKENCODE234", "FRESHCODE234"]);
        let code = generate_unique_code(&db, &mut source, CodePolicy::default(), &[]).await?;

        assert_eq!(code, "FRESHCODE234");
        assert_eq!(source.draws(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_generation_gives_up_after_budget() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_experience(&db, "exp-1").await?;
        insert_test_gift(&db, "exp-1", "TAKENCODE234", "giver").await?;

        let mut source = ScriptedCodeSource::new(&["TAKENCODE234"]);
        let policy = CodePolicy {
            length: 12,
            max_attempts: 3,
        };
        let result = generate_unique_code(&db, &mut source, policy, &[]).await;

        assert!(matches!(
            result,
            Err(Error::CodeGenerationExhausted { attempts: 3 })
        ));
        assert_eq!(source.draws(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_code_pair_is_distinct() -> Result<()> {
        let db = setup_test_db().await?;

        let mut source = ScriptedCodeSource::new(&["SAMECODE2345", "SAMECODE2345", "OTHERCODE234"]);
        let (purchaser, partner) = generate_code_pair(&db, &mut source, CodePolicy::default()).await?;

        assert_eq!(purchaser, "SAMECODE2345");
        assert_eq!(partner, "OTHERCODE234");
        assert_eq!(source.draws(), 3);

        Ok(())
    }
}
