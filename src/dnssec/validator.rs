//! The per-request validation state machine. A response enters at INIT,
//! gets its chain of trust primed in FINDKEY, is proven in VALIDATE
//! (branching per classification, looping through CNAME for chains), and
//! leaves FINISHED with a verdict stamped on every RRset and the message.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::name::Name;
use crate::dns::rdata::DsData;
use crate::dns::DnsPacket;
use crate::error::ResolveError;
use crate::smessage::{SMessage, SRRset, Section, SecurityStatus};

use super::classify::{classify, ResponseClassification};
use super::constants::{DEFAULT_MAX_RRSIGS, MAX_CNAME_CHAIN};
use super::ds::{ds_matches_key, key_length_bits, DigestPolicy};
use super::keycache::{KeyCache, KeyEntry};
use super::nsec::{self, NoDsProof};
use super::nsec3::{self, IterationPolicy};
use super::reason;
use super::trust_anchor::TrustAnchorStore;
use super::verify::{SigBudget, SigVerifier};

/// The upstream lookup interface the validator drives for its DS and DNSKEY
/// sub-queries. The iterative machinery behind it is somebody else's
/// problem; the validator only needs raw signed messages.
#[async_trait]
pub trait PrimingResolver: Send + Sync {
    async fn send(
        &self,
        name: Name,
        rtype: RecordType,
        rclass: RecordClass,
    ) -> Result<DnsPacket, ResolveError>;
}

/// Validator state for one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValState {
    Init,
    FindKey,
    Validate,
    Cname,
    Finished,
}

/// Everything one validation run owns.
struct ValEvent<'a> {
    resolver: &'a dyn PrimingResolver,
    cancel: &'a CancellationToken,
    state: ValState,
    classification: ResponseClassification,
    /// The name still to be proven; rewritten while following CNAMEs.
    qname: Name,
    qtype: RecordType,
    qclass: RecordClass,
    /// Chain-of-trust cursor: the key entry for the response's main signer.
    entry: Option<KeyEntry>,
    cname_count: usize,
    budget: SigBudget,
}

impl ValEvent<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The validation engine. Trust anchors and the key cache are injected;
/// tests hand in fresh instances.
pub struct Validator {
    anchors: Arc<TrustAnchorStore>,
    key_cache: Arc<KeyCache>,
    verifier: SigVerifier,
    digest_policy: DigestPolicy,
    iteration_policy: IterationPolicy,
    max_rrsigs: usize,
}

impl Validator {
    pub fn new(anchors: Arc<TrustAnchorStore>, key_cache: Arc<KeyCache>) -> Self {
        Validator {
            anchors,
            key_cache,
            verifier: SigVerifier::new(0),
            digest_policy: DigestPolicy::default(),
            iteration_policy: IterationPolicy::default(),
            max_rrsigs: DEFAULT_MAX_RRSIGS,
        }
    }

    pub fn with_policies(
        anchors: Arc<TrustAnchorStore>,
        key_cache: Arc<KeyCache>,
        verifier: SigVerifier,
        digest_policy: DigestPolicy,
        iteration_policy: IterationPolicy,
        max_rrsigs: usize,
    ) -> Self {
        Validator {
            anchors,
            key_cache,
            verifier,
            digest_policy,
            iteration_policy,
            max_rrsigs,
        }
    }

    /// Run the state machine over `message`, stamping per-RRset verdicts
    /// and the aggregate. Only transport failures surface as errors;
    /// everything else becomes a verdict.
    pub async fn validate(
        &self,
        resolver: &dyn PrimingResolver,
        message: &mut SMessage,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        let Some(question) = message.question.clone() else {
            message.set_bogus(reason::FAILED_CLASSIFICATION);
            return Ok(());
        };

        let mut event = ValEvent {
            resolver,
            cancel,
            state: ValState::Init,
            classification: classify(message),
            qname: question.name.clone(),
            qtype: question.qtype,
            qclass: question.qclass,
            entry: None,
            cname_count: 0,
            budget: SigBudget::new(self.max_rrsigs),
        };

        while event.state != ValState::Finished {
            event.state = match event.state {
                ValState::Init => self.process_init(&mut event, message),
                ValState::FindKey => self.process_find_key(&mut event, message).await?,
                ValState::Validate => self.process_validate(&mut event, message).await?,
                ValState::Cname => self.process_cname(&mut event, message).await?,
                ValState::Finished => unreachable!("loop exits on FINISHED"),
            };
        }

        Ok(())
    }

    /// INIT: classification sanity and the trust-anchor lookup. No anchor
    /// above the query name means we cannot judge anything.
    fn process_init(&self, event: &mut ValEvent<'_>, message: &mut SMessage) -> ValState {
        debug!(
            "validating {} {} as {}",
            event.qname, event.qtype, event.classification
        );

        if event.classification == ResponseClassification::Unknown {
            message.set_bogus(reason::FAILED_CLASSIFICATION);
            return ValState::Finished;
        }

        if self.anchors.find(&event.qname, event.qclass).is_none() {
            trace!("no trust anchor above {}", event.qname);
            message.set_security(SecurityStatus::Indeterminate);
            return ValState::Finished;
        }

        ValState::FindKey
    }

    /// FINDKEY: prime the chain of trust from the anchor down to the
    /// response's primary signer. A provably unsigned zone short-circuits
    /// to INSECURE; a broken chain to BOGUS.
    async fn process_find_key(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<ValState, ResolveError> {
        let target = response_signer(message).unwrap_or_else(|| event.qname.clone());
        trace!("priming chain of trust to {}", target);

        match self.prime_chain(event, &target).await? {
            None => {
                // The signer sits outside every anchor; nothing to prove.
                message.set_security(SecurityStatus::Indeterminate);
                Ok(ValState::Finished)
            }
            Some(entry) => match &entry {
                KeyEntry::Bad { reason, .. } => {
                    let token = reason.clone();
                    message.set_bogus(&token);
                    Ok(ValState::Finished)
                }
                KeyEntry::Null { owner, .. } => {
                    debug!("zone {} is provably unsigned", owner);
                    message.set_security(SecurityStatus::Insecure);
                    Ok(ValState::Finished)
                }
                KeyEntry::Good { .. } => {
                    event.entry = Some(entry);
                    Ok(ValState::Validate)
                }
            },
        }
    }

    /// VALIDATE: dispatch on classification.
    async fn process_validate(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<ValState, ResolveError> {
        match event.classification {
            ResponseClassification::Positive | ResponseClassification::Any => {
                self.validate_positive(event, message).await?;
                Ok(ValState::Finished)
            }
            ResponseClassification::Cname
            | ResponseClassification::CnameNodata
            | ResponseClassification::CnameNameerror => Ok(ValState::Cname),
            ResponseClassification::Nodata => {
                self.validate_nodata(event, message).await?;
                Ok(ValState::Finished)
            }
            ResponseClassification::Nameerror => {
                self.validate_nameerror(event, message).await?;
                Ok(ValState::Finished)
            }
            ResponseClassification::Referral => {
                self.validate_referral(event, message).await?;
                Ok(ValState::Finished)
            }
            ResponseClassification::Unknown => {
                message.set_bogus(reason::FAILED_CLASSIFICATION);
                Ok(ValState::Finished)
            }
        }
    }

    /// CNAME: walk the answer chain link by link, re-priming keys when the
    /// signer changes, then prove the terminal condition.
    async fn process_cname(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<ValState, ResolveError> {
        let mut answers = std::mem::take(message.section_mut(Section::Answer));
        let mut chain_status = Vec::new();
        let mut failed: Option<&'static str> = None;

        let mut index = 0;
        while index < answers.len() {
            let set_name = answers[index].name().clone();
            let set_type = answers[index].rtype();
            if set_name != event.qname {
                index += 1;
                continue;
            }

            if event.cancelled() {
                *message.section_mut(Section::Answer) = answers;
                message.set_security_reason(SecurityStatus::Indeterminate, reason::CANCELLED);
                return Ok(ValState::Finished);
            }

            let (status, entry) = self.secure_rrset(event, &mut answers[index]).await?;
            chain_status.push(status);
            if status == SecurityStatus::Bogus {
                failed = Some(reason::FAILED_ANSWER_CNAME);
                break;
            }

            if status == SecurityStatus::Secure {
                if let Some(base) = answers[index].wildcard_base().cloned() {
                    let proved = self
                        .prove_wildcard(event, message, &set_name, &base, entry.as_ref())
                        .await?;
                    if proved != SecurityStatus::Secure {
                        answers[index].set_bogus("wildcard expansion unproven");
                        failed = Some(reason::FAILED_ANSWER_POSITIVE_NODATA);
                        break;
                    }
                }
            }

            if set_type == RecordType::Cname && event.qtype != RecordType::Cname {
                match answers[index].first().map(|r| r.target_name()) {
                    Some(Ok(target)) => {
                        event.cname_count += 1;
                        if event.cname_count > MAX_CNAME_CHAIN {
                            warn!("cname chain beyond {} links", MAX_CNAME_CHAIN);
                            failed = Some(reason::FAILED_CNAME_CHAIN);
                            break;
                        }
                        trace!("following CNAME {} -> {}", event.qname, target);
                        event.qname = target;
                        // Restart from the top: chains are not always in
                        // message order.
                        index = 0;
                        continue;
                    }
                    _ => {
                        failed = Some(reason::FAILED_ANSWER_CNAME);
                        break;
                    }
                }
            }

            index += 1;
        }

        *message.section_mut(Section::Answer) = answers;

        if let Some(token) = failed {
            message.set_bogus(token);
            return Ok(ValState::Finished);
        }

        match event.classification {
            ResponseClassification::Cname => {
                let verdict = combine(chain_status.into_iter());
                message.set_security(verdict);
                Ok(ValState::Finished)
            }
            ResponseClassification::CnameNodata => {
                let chain = combine(chain_status.into_iter());
                self.validate_nodata(event, message).await?;
                cap_verdict(message, chain);
                Ok(ValState::Finished)
            }
            ResponseClassification::CnameNameerror => {
                let chain = combine(chain_status.into_iter());
                self.validate_nameerror(event, message).await?;
                cap_verdict(message, chain);
                Ok(ValState::Finished)
            }
            _ => unreachable!("CNAME state only entered for cname classes"),
        }
    }

    /// Positive and ANY answers: every answer RRset must verify, wildcard
    /// expansions need their non-existence proof, and signed authority
    /// sets must hold up too.
    async fn validate_positive(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<(), ResolveError> {
        let failed_token = if event.classification == ResponseClassification::Any {
            reason::FAILED_ANSWER_ANY
        } else {
            reason::FAILED_ANSWER_POSITIVE
        };

        let mut statuses = Vec::new();
        let mut failed: Option<&'static str> = None;
        let mut cancelled = false;

        let mut answers = std::mem::take(message.section_mut(Section::Answer));
        let mut index = 0;
        while index < answers.len() {
            if event.cancelled() {
                cancelled = true;
                break;
            }

            let owner = answers[index].name().clone();
            let (status, entry) = self.secure_rrset(event, &mut answers[index]).await?;
            statuses.push(status);
            if status == SecurityStatus::Bogus {
                failed = Some(failed_token);
                break;
            }

            if status == SecurityStatus::Secure {
                if let Some(base) = answers[index].wildcard_base().cloned() {
                    let proved = self
                        .prove_wildcard(event, message, &owner, &base, entry.as_ref())
                        .await?;
                    if proved != SecurityStatus::Secure {
                        answers[index].set_bogus("wildcard expansion unproven");
                        failed = Some(reason::FAILED_ANSWER_POSITIVE_NODATA);
                        break;
                    }
                }
            }

            index += 1;
        }
        *message.section_mut(Section::Answer) = answers;

        if cancelled {
            message.set_security_reason(SecurityStatus::Indeterminate, reason::CANCELLED);
            return Ok(());
        }
        if let Some(token) = failed {
            message.set_bogus(token);
            return Ok(());
        }

        let authority_status = self.validate_section(event, message, Section::Authority).await?;
        match authority_status {
            SecurityStatus::Bogus => {
                message.set_bogus(failed_token);
                return Ok(());
            }
            other => statuses.push(other),
        }

        message.set_security(combine(statuses.into_iter()));
        Ok(())
    }

    /// NODATA: the authority proofs must show the type is absent.
    async fn validate_nodata(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<(), ResolveError> {
        let proofs = self.gather_proofs(event, message).await?;
        let qname = event.qname.clone();
        let qtype = event.qtype;

        if proofs.broken {
            message.set_bogus(reason::FAILED_NODATA_MISSING);
            return Ok(());
        }

        if !proofs.nsec3.is_empty() && !proofs.nsec.is_empty() {
            message.set_bogus(reason::FAILED_NODATA_MISSING);
            return Ok(());
        }

        if !proofs.nsec3.is_empty() {
            let sets: Vec<&SRRset> = proofs.nsec3.iter().collect();
            let records = nsec3::collect(&sets);
            let status = nsec3::prove_nodata(
                &records,
                &qname,
                qtype,
                &proofs.zone,
                proofs.key_bits,
                &self.iteration_policy,
            );
            match status {
                SecurityStatus::Secure => message.set_security(SecurityStatus::Secure),
                SecurityStatus::Insecure => message.set_security(SecurityStatus::Insecure),
                _ => message.set_bogus(reason::FAILED_NODATA_NSEC3),
            }
            return Ok(());
        }

        if !proofs.nsec.is_empty() {
            let sets: Vec<&SRRset> = proofs.nsec.iter().collect();
            let status = nsec::prove_nodata(&sets, &qname, qtype);
            match status {
                SecurityStatus::Secure => message.set_security(SecurityStatus::Secure),
                _ => message.set_bogus(reason::FAILED_NODATA_NSEC),
            }
            return Ok(());
        }

        if proofs.all_insecure {
            message.set_security(SecurityStatus::Insecure);
        } else {
            message.set_bogus(reason::FAILED_NODATA_MISSING);
        }
        Ok(())
    }

    /// NXDOMAIN: name error proofs, with the NODATA-downgrade check; proofs
    /// that only establish NODATA mean somebody rewrote the RCODE.
    async fn validate_nameerror(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<(), ResolveError> {
        let proofs = self.gather_proofs(event, message).await?;
        let qname = event.qname.clone();

        if proofs.broken {
            message.set_bogus(reason::FAILED_NXDOMAIN_MISSING);
            return Ok(());
        }

        if !proofs.nsec3.is_empty() && !proofs.nsec.is_empty() {
            message.set_bogus(reason::FAILED_NXDOMAIN_MISSING);
            return Ok(());
        }

        if !proofs.nsec3.is_empty() {
            let sets: Vec<&SRRset> = proofs.nsec3.iter().collect();
            let records = nsec3::collect(&sets);
            let status = nsec3::prove_nameerror(
                &records,
                &qname,
                &proofs.zone,
                proofs.key_bits,
                &self.iteration_policy,
            );
            match status {
                SecurityStatus::Secure => message.set_security(SecurityStatus::Secure),
                SecurityStatus::Insecure => {
                    message
                        .set_security_reason(SecurityStatus::Insecure, reason::INSECURE_NXDOMAIN_NSEC3);
                }
                _ => message.set_bogus(reason::FAILED_NXDOMAIN_NSEC3),
            }
            return Ok(());
        }

        if !proofs.nsec.is_empty() {
            let sets: Vec<&SRRset> = proofs.nsec.iter().collect();
            match nsec::prove_nameerror(&sets, &qname) {
                SecurityStatus::Secure => message.set_security(SecurityStatus::Secure),
                _ => message.set_bogus(reason::FAILED_NXDOMAIN_NSEC),
            }
            return Ok(());
        }

        if proofs.all_insecure {
            message.set_security(SecurityStatus::Insecure);
        } else {
            message.set_bogus(reason::FAILED_NXDOMAIN_MISSING);
        }
        Ok(())
    }

    /// REFERRAL: a DS set decides secure referral; its proven absence an
    /// insecure delegation. The NS set at a delegation is unsigned by
    /// design and stays unchecked.
    async fn validate_referral(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<(), ResolveError> {
        let delegation = message
            .section(Section::Authority)
            .iter()
            .find(|s| s.rtype() == RecordType::Ns)
            .map(|s| s.name().clone());
        let Some(delegation) = delegation else {
            message.set_bogus(reason::FAILED_REFERRAL);
            return Ok(());
        };

        // A DS RRset present alongside the delegation: secure referral.
        let mut authority = std::mem::take(message.section_mut(Section::Authority));
        let ds_index = authority
            .iter()
            .position(|s| s.rtype() == RecordType::Ds && s.name() == &delegation);
        if let Some(index) = ds_index {
            let (status, _) = self.secure_rrset(event, &mut authority[index]).await?;
            *message.section_mut(Section::Authority) = authority;
            match status {
                SecurityStatus::Secure => message.set_security(SecurityStatus::Secure),
                SecurityStatus::Insecure => message.set_security(SecurityStatus::Insecure),
                _ => message.set_bogus(reason::FAILED_REFERRAL),
            }
            return Ok(());
        }
        *message.section_mut(Section::Authority) = authority;

        // No DS: the NSEC/NSEC3 records must prove its absence.
        let proofs = self.gather_proofs(event, message).await?;
        if proofs.broken {
            message.set_bogus(reason::FAILED_REFERRAL);
            return Ok(());
        }

        let proof = if !proofs.nsec3.is_empty() {
            let sets: Vec<&SRRset> = proofs.nsec3.iter().collect();
            let records = nsec3::collect(&sets);
            nsec3::prove_no_ds(
                &records,
                &delegation,
                &proofs.zone,
                proofs.key_bits,
                &self.iteration_policy,
            )
        } else if !proofs.nsec.is_empty() {
            let sets: Vec<&SRRset> = proofs.nsec.iter().collect();
            nsec::prove_no_ds(&sets, &delegation)
        } else if proofs.all_insecure {
            message.set_security(SecurityStatus::Insecure);
            return Ok(());
        } else {
            message.set_bogus(reason::FAILED_REFERRAL);
            return Ok(());
        };

        match proof {
            NoDsProof::InsecureDelegation => message.set_security(SecurityStatus::Insecure),
            NoDsProof::NotDelegation | NoDsProof::Broken => {
                message.set_bogus(reason::FAILED_REFERRAL)
            }
        }
        Ok(())
    }

    /// Validate every RRset in a section; returns the combined status.
    async fn validate_section(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
        section: Section,
    ) -> Result<SecurityStatus, ResolveError> {
        let mut sets = std::mem::take(message.section_mut(section));
        let mut statuses = Vec::new();
        for set in sets.iter_mut() {
            if event.cancelled() {
                break;
            }
            let (status, _) = self.secure_rrset(event, set).await?;
            statuses.push(status);
        }
        *message.section_mut(section) = sets;
        Ok(combine(statuses.into_iter()))
    }

    /// Authority-section denial proofs, validated before use. Only SECURE
    /// NSEC/NSEC3 sets may prove anything.
    async fn gather_proofs(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
    ) -> Result<GatheredProofs, ResolveError> {
        let mut authority = std::mem::take(message.section_mut(Section::Authority));

        let mut proofs = GatheredProofs {
            nsec: Vec::new(),
            nsec3: Vec::new(),
            zone: Name::root(),
            key_bits: 0,
            all_insecure: !authority.is_empty(),
            broken: false,
        };

        for set in authority.iter_mut() {
            if event.cancelled() {
                proofs.broken = true;
                break;
            }

            let (status, entry) = self.secure_rrset(event, set).await?;
            match status {
                SecurityStatus::Secure => {
                    proofs.all_insecure = false;
                    match set.rtype() {
                        RecordType::Nsec => proofs.nsec.push(set.clone()),
                        RecordType::Nsec3 => {
                            if let Some(KeyEntry::Good { keys }) = &entry {
                                proofs.zone = keys.name().clone();
                                proofs.key_bits = proofs.key_bits.max(entry_key_bits(keys));
                            }
                            proofs.nsec3.push(set.clone());
                        }
                        _ => {}
                    }
                }
                SecurityStatus::Insecure | SecurityStatus::Indeterminate => {}
                SecurityStatus::Bogus | SecurityStatus::Unchecked => {
                    proofs.all_insecure = false;
                    proofs.broken = true;
                    break;
                }
            }
        }

        *message.section_mut(Section::Authority) = authority;
        Ok(proofs)
    }

    /// Wildcard-expansion obligation for one positive RRset: the authority
    /// section must prove the original name does not exist.
    async fn prove_wildcard(
        &self,
        event: &mut ValEvent<'_>,
        message: &mut SMessage,
        owner: &Name,
        base: &Name,
        entry: Option<&KeyEntry>,
    ) -> Result<SecurityStatus, ResolveError> {
        let proofs = self.gather_proofs(event, message).await?;
        if proofs.broken {
            return Ok(SecurityStatus::Bogus);
        }

        if !proofs.nsec3.is_empty() {
            let key_bits = entry
                .and_then(KeyEntry::keys)
                .map(entry_key_bits)
                .unwrap_or(proofs.key_bits);
            let sets: Vec<&SRRset> = proofs.nsec3.iter().collect();
            let records = nsec3::collect(&sets);
            return Ok(nsec3::prove_wildcard_expansion(
                &records,
                owner,
                &proofs.zone,
                base,
                key_bits,
                &self.iteration_policy,
            ));
        }

        if !proofs.nsec.is_empty() {
            let sets: Vec<&SRRset> = proofs.nsec.iter().collect();
            return Ok(nsec::prove_wildcard_expansion(&sets, owner, base));
        }

        Ok(SecurityStatus::Bogus)
    }

    /// Validate one RRset: find its signer, prime the chain of trust for
    /// that signer, then verify. Unsigned sets inherit the zone's security:
    /// insecure below an unsigned cut, bogus inside a signed zone.
    async fn secure_rrset(
        &self,
        event: &mut ValEvent<'_>,
        rrset: &mut SRRset,
    ) -> Result<(SecurityStatus, Option<KeyEntry>), ResolveError> {
        let signer = rrset
            .sigs()
            .first()
            .and_then(|sig| sig.rrsig().ok())
            .map(|rrsig| rrsig.signer_name);

        let target = match &signer {
            Some(name) => name.clone(),
            // Unsigned: the zone of the owner itself decides.
            None => rrset.name().clone(),
        };

        let entry = match &event.entry {
            Some(entry) if entry.owner() == &target => Some(entry.clone()),
            _ => self.prime_chain(event, &target).await?,
        };

        let Some(entry) = entry else {
            rrset.set_security(SecurityStatus::Indeterminate);
            return Ok((SecurityStatus::Indeterminate, None));
        };

        let status = match &entry {
            KeyEntry::Null { .. } => {
                rrset.set_security(SecurityStatus::Insecure);
                SecurityStatus::Insecure
            }
            KeyEntry::Bad { reason, .. } => {
                let text = reason.clone();
                rrset.set_bogus(&text);
                SecurityStatus::Bogus
            }
            KeyEntry::Good { keys } => {
                if signer.is_none() {
                    rrset.set_bogus("RRset unsigned inside a signed zone");
                    SecurityStatus::Bogus
                } else if event.cancelled() {
                    rrset.set_security(SecurityStatus::Indeterminate);
                    SecurityStatus::Indeterminate
                } else {
                    self.verifier.verify_rrset(rrset, keys, &mut event.budget)
                }
            }
        };

        Ok((status, Some(entry)))
    }

    /// Prime the chain of trust from the nearest anchor down to `target`.
    /// Returns `None` when no anchor covers the target at all.
    async fn prime_chain(
        &self,
        event: &mut ValEvent<'_>,
        target: &Name,
    ) -> Result<Option<KeyEntry>, ResolveError> {
        let Some(anchor) = self.anchors.find(target, event.qclass) else {
            return Ok(None);
        };

        let mut current = anchor.name().clone();
        let mut entry = match self.key_cache.get(&current, event.qclass) {
            Some(entry) => entry,
            None => {
                let primed = self.prime_anchor(event, &anchor).await?;
                self.key_cache.store(primed.clone(), anchor.ttl());
                primed
            }
        };

        while entry.is_good() && &current != target {
            let next = target.suffix(current.label_count() + 1);

            if let Some(cached) = self.key_cache.get(&next, event.qclass) {
                trace!("key cache hit for {}", next);
                entry = cached;
                current = next;
                continue;
            }

            match self.step_down(event, &entry, &next).await? {
                ChainStep::Entry(new_entry, ttl) => {
                    self.key_cache.store(new_entry.clone(), ttl);
                    entry = new_entry;
                }
                ChainStep::SameZone => {
                    // No zone cut at `next`; the current keys keep signing.
                }
            }
            current = next;
        }

        Ok(Some(entry))
    }

    /// Establish the key entry for a trust-anchor zone. DNSKEY anchors
    /// bless a fetched key set; DS anchors bind it through the digest.
    async fn prime_anchor(
        &self,
        event: &mut ValEvent<'_>,
        anchor: &SRRset,
    ) -> Result<KeyEntry, ResolveError> {
        let zone = anchor.name().clone();

        match anchor.rtype() {
            RecordType::Dnskey => self.fetch_verified_keys(event, &zone, anchor).await,
            RecordType::Ds => {
                let ds_records: Vec<DsData> = anchor
                    .records()
                    .iter()
                    .filter_map(|r| r.ds().ok())
                    .collect();
                self.keys_for_ds(event, &zone, &ds_records).await
            }
            _ => Ok(KeyEntry::bad(
                zone,
                event.qclass,
                reason::FAILED_FINDKEY_DNSKEY,
            )),
        }
    }

    /// One delegation step: ask for DS at `child` and decide what the
    /// answer means for the chain.
    async fn step_down(
        &self,
        event: &mut ValEvent<'_>,
        entry: &KeyEntry,
        child: &Name,
    ) -> Result<ChainStep, ResolveError> {
        if event.cancelled() {
            return Ok(ChainStep::Entry(
                KeyEntry::bad(child.clone(), event.qclass, reason::CANCELLED),
                0,
            ));
        }

        let packet = event
            .resolver
            .send(child.clone(), RecordType::Ds, event.qclass)
            .await?;
        let mut ds_message = SMessage::from_packet(&packet);
        let keys = entry.keys().expect("step_down runs on good entries");

        match classify(&ds_message) {
            ResponseClassification::Positive => {
                let mut answers = std::mem::take(ds_message.section_mut(Section::Answer));
                let Some(ds_set) = answers
                    .iter_mut()
                    .find(|s| s.rtype() == RecordType::Ds && s.name() == child)
                else {
                    return Ok(ChainStep::Entry(
                        KeyEntry::bad(child.clone(), event.qclass, reason::FAILED_FINDKEY_DS),
                        0,
                    ));
                };

                if self.verifier.verify_rrset(ds_set, keys, &mut event.budget)
                    != SecurityStatus::Secure
                {
                    return Ok(ChainStep::Entry(
                        KeyEntry::bad(child.clone(), event.qclass, reason::FAILED_FINDKEY_DS),
                        0,
                    ));
                }

                let ttl = ds_set.ttl();
                let ds_records: Vec<DsData> =
                    ds_set.records().iter().filter_map(|r| r.ds().ok()).collect();
                let child_entry = self.keys_for_ds(event, child, &ds_records).await?;
                Ok(ChainStep::Entry(child_entry, ttl))
            }

            ResponseClassification::Nodata => {
                self.judge_ds_nodata(event, entry, child, &mut ds_message)
                    .await
            }

            ResponseClassification::Nameerror => Ok(ChainStep::Entry(
                KeyEntry::bad(child.clone(), event.qclass, reason::FAILED_FINDKEY_NXDOMAIN),
                0,
            )),

            other => {
                debug!("DS response for {} classified {}", child, other);
                Ok(ChainStep::Entry(
                    KeyEntry::bad(child.clone(), event.qclass, reason::FAILED_FINDKEY_DS),
                    0,
                ))
            }
        }
    }

    /// A NODATA answer to the DS question: prove whether `child` is an
    /// insecure delegation, no delegation at all, or a lie.
    async fn judge_ds_nodata(
        &self,
        event: &mut ValEvent<'_>,
        entry: &KeyEntry,
        child: &Name,
        ds_message: &mut SMessage,
    ) -> Result<ChainStep, ResolveError> {
        let keys = entry.keys().expect("judge_ds_nodata runs on good entries");
        let zone = keys.name().clone();
        let key_bits = entry_key_bits(keys);

        let mut authority = std::mem::take(ds_message.section_mut(Section::Authority));
        let mut nsec_sets = Vec::new();
        let mut nsec3_sets = Vec::new();
        let mut proof_ttl = u32::MAX;
        for set in authority.iter_mut() {
            if !matches!(set.rtype(), RecordType::Nsec | RecordType::Nsec3) {
                continue;
            }
            if self.verifier.verify_rrset(set, keys, &mut event.budget) == SecurityStatus::Secure {
                proof_ttl = proof_ttl.min(set.ttl());
                match set.rtype() {
                    RecordType::Nsec => nsec_sets.push(set.clone()),
                    _ => nsec3_sets.push(set.clone()),
                }
            }
        }
        *ds_message.section_mut(Section::Authority) = authority;
        let proof_ttl = if proof_ttl == u32::MAX { 60 } else { proof_ttl };

        let proof = if !nsec3_sets.is_empty() {
            let sets: Vec<&SRRset> = nsec3_sets.iter().collect();
            let records = nsec3::collect(&sets);
            nsec3::prove_no_ds(&records, child, &zone, key_bits, &self.iteration_policy)
        } else if !nsec_sets.is_empty() {
            let sets: Vec<&SRRset> = nsec_sets.iter().collect();
            nsec::prove_no_ds(&sets, child)
        } else {
            NoDsProof::Broken
        };

        match proof {
            NoDsProof::InsecureDelegation => {
                debug!("{} is a provably insecure delegation", child);
                Ok(ChainStep::Entry(
                    KeyEntry::null(child.clone(), event.qclass),
                    proof_ttl,
                ))
            }
            NoDsProof::NotDelegation => Ok(ChainStep::SameZone),
            NoDsProof::Broken => Ok(ChainStep::Entry(
                KeyEntry::bad(child.clone(), event.qclass, reason::FAILED_FINDKEY_DS),
                0,
            )),
        }
    }

    /// Fetch the DNSKEY set for `zone` and verify it against `ds_records`:
    /// a DS-referenced key must both match the digest and sign the set.
    async fn keys_for_ds(
        &self,
        event: &mut ValEvent<'_>,
        zone: &Name,
        ds_records: &[DsData],
    ) -> Result<KeyEntry, ResolveError> {
        let usable = self.digest_policy.usable_ds(ds_records);
        if usable.is_empty() {
            // A DS set we cannot process at all leaves the child outside
            // the chain, insecure rather than broken.
            if !ds_records.is_empty() {
                debug!("DS set for {} uses only unsupported algorithms", zone);
                return Ok(KeyEntry::null(zone.clone(), event.qclass));
            }
            return Ok(KeyEntry::bad(
                zone.clone(),
                event.qclass,
                reason::FAILED_FINDKEY_DS,
            ));
        }

        if event.cancelled() {
            return Ok(KeyEntry::bad(zone.clone(), event.qclass, reason::CANCELLED));
        }

        let packet = event
            .resolver
            .send(zone.clone(), RecordType::Dnskey, event.qclass)
            .await?;
        let key_message = SMessage::from_packet(&packet);
        let Some(key_set) =
            key_message.find_rrset(zone, RecordType::Dnskey, event.qclass, Section::Answer)
        else {
            return Ok(KeyEntry::bad(
                zone.clone(),
                event.qclass,
                reason::FAILED_FINDKEY_DNSKEY,
            ));
        };

        // Keys the DS set commits to; only they may vouch for the rest.
        let sep_keys: Vec<_> = key_set
            .records()
            .iter()
            .filter(|record| {
                record.dnskey().map_or(false, |key| {
                    usable.iter().any(|ds| ds_matches_key(ds, zone, &key))
                })
            })
            .cloned()
            .collect();

        if sep_keys.is_empty() {
            debug!("no DNSKEY at {} matches the DS set", zone);
            return Ok(KeyEntry::bad(
                zone.clone(),
                event.qclass,
                reason::FAILED_FINDKEY_DNSKEY,
            ));
        }

        let sep_set = SRRset::from_records(sep_keys);
        let mut verified = key_set.clone();
        if self
            .verifier
            .verify_rrset(&mut verified, &sep_set, &mut event.budget)
            == SecurityStatus::Secure
        {
            Ok(KeyEntry::good(verified))
        } else {
            Ok(KeyEntry::bad(
                zone.clone(),
                event.qclass,
                reason::FAILED_FINDKEY_DNSKEY,
            ))
        }
    }

    /// Fetch the DNSKEY set for a zone anchored by DNSKEY records: the
    /// fetched set must verify under the anchor keys themselves.
    async fn fetch_verified_keys(
        &self,
        event: &mut ValEvent<'_>,
        zone: &Name,
        anchor: &SRRset,
    ) -> Result<KeyEntry, ResolveError> {
        if event.cancelled() {
            return Ok(KeyEntry::bad(zone.clone(), event.qclass, reason::CANCELLED));
        }

        let packet = event
            .resolver
            .send(zone.clone(), RecordType::Dnskey, event.qclass)
            .await?;
        let key_message = SMessage::from_packet(&packet);
        let Some(key_set) =
            key_message.find_rrset(zone, RecordType::Dnskey, event.qclass, Section::Answer)
        else {
            return Ok(KeyEntry::bad(
                zone.clone(),
                event.qclass,
                reason::FAILED_FINDKEY_DNSKEY,
            ));
        };

        let mut verified = key_set.clone();
        if self
            .verifier
            .verify_rrset(&mut verified, anchor, &mut event.budget)
            == SecurityStatus::Secure
        {
            Ok(KeyEntry::good(verified))
        } else {
            Ok(KeyEntry::bad(
                zone.clone(),
                event.qclass,
                reason::FAILED_FINDKEY_DNSKEY,
            ))
        }
    }
}

/// What one chain step produced.
enum ChainStep {
    /// A new entry for the child zone, with the TTL of its proof records.
    Entry(KeyEntry, u32),
    /// No zone cut; the parent's keys keep authority.
    SameZone,
}

/// Validated NSEC/NSEC3 material pulled from an authority section.
struct GatheredProofs {
    nsec: Vec<SRRset>,
    nsec3: Vec<SRRset>,
    /// The zone the NSEC3 records hash under.
    zone: Name,
    /// Largest signing key, for the iteration ceiling.
    key_bits: usize,
    /// Every authority set sat below an unsigned cut.
    all_insecure: bool,
    /// Some authority set failed validation outright.
    broken: bool,
}

/// The signer the response chains up from: the first RRSIG in the answer
/// section, falling back to the authority section.
fn response_signer(message: &SMessage) -> Option<Name> {
    for section in [Section::Answer, Section::Authority] {
        for set in message.section(section) {
            if let Some(sig) = set.sigs().first() {
                if let Ok(rrsig) = sig.rrsig() {
                    return Some(rrsig.signer_name);
                }
            }
        }
    }
    None
}

/// Largest key in a DNSKEY set, in bits.
fn entry_key_bits(keys: &SRRset) -> usize {
    keys.records()
        .iter()
        .filter_map(|r| r.dnskey().ok())
        .map(|k| key_length_bits(&k))
        .max()
        .unwrap_or(0)
}

/// The aggregate rule: bogus dominates, then insecure, then secure when
/// every input is secure; anything else is indeterminate.
fn combine(statuses: impl Iterator<Item = SecurityStatus>) -> SecurityStatus {
    let mut any = false;
    let mut all_secure = true;
    let mut any_insecure = false;
    for status in statuses {
        any = true;
        match status {
            SecurityStatus::Bogus => return SecurityStatus::Bogus,
            SecurityStatus::Insecure => {
                any_insecure = true;
                all_secure = false;
            }
            SecurityStatus::Secure => {}
            SecurityStatus::Unchecked | SecurityStatus::Indeterminate => all_secure = false,
        }
    }

    if !any {
        return SecurityStatus::Secure;
    }
    if any_insecure {
        return SecurityStatus::Insecure;
    }
    if all_secure {
        SecurityStatus::Secure
    } else {
        SecurityStatus::Indeterminate
    }
}

/// Lower `message`'s verdict to `cap` when the cap is weaker than what the
/// terminal proof established.
fn cap_verdict(message: &mut SMessage, cap: SecurityStatus) {
    let current = message.security();
    let rank = |s: SecurityStatus| match s {
        SecurityStatus::Bogus => 0,
        SecurityStatus::Indeterminate | SecurityStatus::Unchecked => 1,
        SecurityStatus::Insecure => 2,
        SecurityStatus::Secure => 3,
    };
    if rank(cap) < rank(current) {
        message.set_security(cap);
    }
}
