//! CLI wrapper: sign / prove / verify / info
//!
//! Thin shell over the library. Datasets, keys, and bindings travel as
//! structural JSON documents (RDF document parsing and canonicalization
//! are external concerns); envelopes are the library's JSON wire format.
//!
//! Exit codes: 0 success, 1 verification failure, 2 usage/configuration
//! error, 3 unsupported feature.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::{env, fs};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use oxrdf::{GraphName, Quad, Subject, Term, Variable};
use serde::{Deserialize, Serialize};

use zksparql::commit::Commitment;
use zksparql::envelope::{Envelope, SerializedTerm, VerificationResult};
use zksparql::signer::{KeyPair, PublicKey, SecretKey, Signature};
use zksparql::{
    generate_keypair, info, prepare_proof, sign_dataset, verify_envelope, Binding, ProofConfig,
    SignedDataset,
};

const USAGE: &str = "\
usage: zksparql <command> [options]

commands:
  sign    --dataset <quads.json> (--key <key.json> | --gen-key <out.json>) --out <signed.json>
  prove   --query <q.rq> --signed <signed.json> [--signed <more.json> ...]
          [--binding <binding.json>] [--strict] --out <envelope.json>
  verify  --envelope <envelope.json>
  info    --query <q.rq> [--keys <signed.json> ...]

options (sign/prove/info):
  --depth <D>          merkle depth (default 16)
  --path-max <N>       property-path expansion bound (default 4)
  --range-width <W>    numeric comparison window bits (default 64)
";

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn parse_flag_multi(args: &[String], key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            if let Some(v) = it.next() {
                out.push(v.clone());
            }
        }
    }
    out
}

fn config_from_args(args: &[String]) -> anyhow::Result<ProofConfig> {
    let mut config = ProofConfig::default();
    if let Some(d) = parse_flag(args, "--depth") {
        config.merkle_depth = d.parse().context("--depth must be an integer")?;
    }
    if let Some(p) = parse_flag(args, "--path-max") {
        config.path_segment_max = p.parse().context("--path-max must be an integer")?;
    }
    if let Some(w) = parse_flag(args, "--range-width") {
        config.range_width = w.parse().context("--range-width must be an integer")?;
    }
    Ok(config)
}

// ============================================================================
// JSON documents
// ============================================================================

#[derive(Serialize, Deserialize)]
struct QuadDoc {
    subject: SerializedTerm,
    predicate: SerializedTerm,
    object: SerializedTerm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    graph: Option<SerializedTerm>,
}

#[derive(Serialize, Deserialize)]
struct DatasetDoc {
    quads: Vec<QuadDoc>,
}

#[derive(Serialize, Deserialize)]
struct KeyDoc {
    scheme: String,
    public: String,
    secret: String,
}

#[derive(Serialize, Deserialize)]
struct SignedDoc {
    quads: Vec<QuadDoc>,
    signature: String,
    public_key: String,
}

fn quad_from_doc(doc: &QuadDoc) -> anyhow::Result<Quad> {
    let subject = match doc.subject.to_term()? {
        Term::NamedNode(n) => Subject::NamedNode(n),
        Term::BlankNode(b) => Subject::BlankNode(b),
        other => anyhow::bail!("quad subject must be an IRI or blank node, got {other}"),
    };
    let predicate = match doc.predicate.to_term()? {
        Term::NamedNode(n) => n,
        other => anyhow::bail!("quad predicate must be an IRI, got {other}"),
    };
    let object = doc.object.to_term()?;
    let graph = match &doc.graph {
        None => GraphName::DefaultGraph,
        Some(g) => match g.to_term()? {
            Term::NamedNode(n) => GraphName::NamedNode(n),
            Term::BlankNode(b) => GraphName::BlankNode(b),
            other => anyhow::bail!("quad graph must be an IRI or blank node, got {other}"),
        },
    };
    Ok(Quad::new(subject, predicate, object, graph))
}

fn load_quads(path: &str) -> anyhow::Result<Vec<Quad>> {
    let text = fs::read_to_string(path).with_context(|| format!("read dataset {path}"))?;
    let doc: DatasetDoc = serde_json::from_str(&text).with_context(|| format!("parse {path}"))?;
    doc.quads.iter().map(quad_from_doc).collect()
}

fn load_signed(path: &str, config: &ProofConfig) -> anyhow::Result<SignedDataset> {
    let text = fs::read_to_string(path).with_context(|| format!("read signed dataset {path}"))?;
    let doc: SignedDoc = serde_json::from_str(&text).with_context(|| format!("parse {path}"))?;
    let quads: Vec<Quad> = doc.quads.iter().map(quad_from_doc).collect::<anyhow::Result<_>>()?;
    let oracle = zksparql::hash::oracle_by_id(&config.hash_id)?;
    let commitment = Commitment::over_quads(oracle.as_ref(), config, &quads)?;
    Ok(SignedDataset {
        quads,
        commitment,
        signature: Signature(BASE64.decode(&doc.signature).context("signature base64")?),
        public_key: PublicKey(BASE64.decode(&doc.public_key).context("public key base64")?),
    })
}

fn load_binding(path: &str) -> anyhow::Result<Binding> {
    let text = fs::read_to_string(path).with_context(|| format!("read binding {path}"))?;
    let doc: BTreeMap<String, SerializedTerm> =
        serde_json::from_str(&text).with_context(|| format!("parse {path}"))?;
    let mut binding = Binding::new();
    for (name, term) in doc {
        let var = Variable::new(name.clone())
            .map_err(|e| anyhow::anyhow!("bad variable name `{name}`: {e}"))?;
        binding.insert(var, term.to_term()?);
    }
    Ok(binding)
}

// ============================================================================
// Subcommands
// ============================================================================

fn cmd_sign(args: &[String]) -> anyhow::Result<ExitCode> {
    let config = config_from_args(args)?;
    let dataset_path = parse_flag(args, "--dataset").context("missing --dataset")?;
    let out_path = parse_flag(args, "--out").context("missing --out")?;
    let quads = load_quads(&dataset_path)?;

    let keys = match (parse_flag(args, "--key"), parse_flag(args, "--gen-key")) {
        (Some(path), _) => {
            let text = fs::read_to_string(&path).with_context(|| format!("read key {path}"))?;
            let doc: KeyDoc = serde_json::from_str(&text).with_context(|| format!("parse {path}"))?;
            if doc.scheme != config.signer_id {
                anyhow::bail!(
                    "key scheme `{}` does not match the configured `{}`",
                    doc.scheme,
                    config.signer_id
                );
            }
            KeyPair {
                public: PublicKey(BASE64.decode(&doc.public).context("public key base64")?),
                secret: SecretKey(BASE64.decode(&doc.secret).context("secret key base64")?),
            }
        }
        (None, Some(path)) => {
            let keys = generate_keypair(&config)?;
            let doc = KeyDoc {
                scheme: config.signer_id.clone(),
                public: BASE64.encode(&keys.public.0),
                secret: BASE64.encode(&keys.secret.0),
            };
            fs::write(&path, serde_json::to_string_pretty(&doc)?)
                .with_context(|| format!("write key {path}"))?;
            eprintln!("generated key pair -> {path}");
            keys
        }
        (None, None) => anyhow::bail!("either --key or --gen-key is required"),
    };

    let signed = sign_dataset(quads, &keys, &config)?;
    let doc = SignedDoc {
        quads: signed
            .quads
            .iter()
            .map(|q| QuadDoc {
                subject: SerializedTerm::from_term(&subject_term(q)),
                predicate: SerializedTerm::from_term(&Term::NamedNode(q.predicate.clone())),
                object: SerializedTerm::from_term(&q.object),
                graph: graph_term(q).map(|t| SerializedTerm::from_term(&t)),
            })
            .collect(),
        signature: BASE64.encode(&signed.signature.0),
        public_key: BASE64.encode(&signed.public_key.0),
    };
    fs::write(&out_path, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("write {out_path}"))?;
    eprintln!(
        "signed {} quads (depth {}) -> {}",
        signed.quads.len(),
        config.merkle_depth,
        out_path
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_prove(args: &[String]) -> anyhow::Result<ExitCode> {
    let config = config_from_args(args)?;
    let query_path = parse_flag(args, "--query").context("missing --query")?;
    let out_path = parse_flag(args, "--out").context("missing --out")?;
    let signed_paths = parse_flag_multi(args, "--signed");
    if signed_paths.is_empty() {
        anyhow::bail!("at least one --signed dataset is required");
    }

    let query = fs::read_to_string(&query_path).with_context(|| format!("read {query_path}"))?;
    let datasets: Vec<SignedDataset> = signed_paths
        .iter()
        .map(|p| load_signed(p, &config))
        .collect::<anyhow::Result<_>>()?;
    let binding = match parse_flag(args, "--binding") {
        Some(path) => load_binding(&path)?,
        None => Binding::new(),
    };

    let bundle = prepare_proof(&query, &datasets, &binding, &config)?;
    if bundle.ambiguous {
        if args.iter().any(|a| a == "--strict") {
            return Err(zksparql::Error::AmbiguousBinding.into());
        }
        eprintln!("warning: binding is ambiguous; the lowest-index assignment was chosen");
    }
    fs::write(&out_path, bundle.envelope.to_json()?)
        .with_context(|| format!("write {out_path}"))?;
    eprintln!(
        "proof over {} slot(s), {} hidden input(s) -> {}",
        bundle.program.slots.len(),
        bundle.program.hidden.len(),
        out_path
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(args: &[String]) -> anyhow::Result<ExitCode> {
    let envelope_path = parse_flag(args, "--envelope").context("missing --envelope")?;
    let text =
        fs::read_to_string(&envelope_path).with_context(|| format!("read {envelope_path}"))?;
    let envelope = Envelope::from_json(&text)?;
    match verify_envelope(&envelope)? {
        VerificationResult::Valid { bindings } => {
            println!("{}", serde_json::to_string_pretty(&bindings)?);
            eprintln!("valid");
            Ok(ExitCode::SUCCESS)
        }
        VerificationResult::Invalid { reason } => Err(zksparql::Error::VerifyFailed(reason).into()),
    }
}

fn cmd_info(args: &[String]) -> anyhow::Result<ExitCode> {
    let config = config_from_args(args)?;
    let query_path = parse_flag(args, "--query").context("missing --query")?;
    let query = fs::read_to_string(&query_path).with_context(|| format!("read {query_path}"))?;

    let key_paths = parse_flag_multi(args, "--keys");
    let keys: Option<Vec<PublicKey>> = if key_paths.is_empty() {
        None
    } else {
        let mut out = Vec::new();
        for p in &key_paths {
            out.push(load_signed(p, &config)?.public_key);
        }
        Some(out)
    };

    let disclosure = info(&query, &config, keys.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&disclosure)?);
    Ok(ExitCode::SUCCESS)
}

fn subject_term(q: &Quad) -> Term {
    match &q.subject {
        Subject::NamedNode(n) => Term::NamedNode(n.clone()),
        Subject::BlankNode(b) => Term::BlankNode(b.clone()),
    }
}

fn graph_term(q: &Quad) -> Option<Term> {
    match &q.graph_name {
        GraphName::NamedNode(n) => Some(Term::NamedNode(n.clone())),
        GraphName::BlankNode(b) => Some(Term::BlankNode(b.clone())),
        GraphName::DefaultGraph => None,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let result = match command.as_str() {
        "sign" => cmd_sign(&args[1..]),
        "prove" => cmd_prove(&args[1..]),
        "verify" => cmd_verify(&args[1..]),
        "info" => cmd_info(&args[1..]),
        "--help" | "-h" | "help" => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        other => {
            eprintln!("unknown command `{other}`\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<zksparql::Error>()
                .map(zksparql::Error::exit_code)
                .unwrap_or(2);
            ExitCode::from(code)
        }
    }
}
