//! Built-in ICH Common Technical Document catalog.
//!
//! Modules 1-5 with their top-level sections; the Clinical Overview (2.5) and
//! Clinical Study Reports (5.3) subtrees are complete, since those are the
//! generation targets and the evidence sources respectively.
//! Also carries the default Clinical Overview dependency graph and the
//! 2.5.x -> 5.3.x evidence routes.

use crate::pipeline::dependency::DependencyGraph;
use crate::pipeline::generation::evidence::EvidenceRoutes;

use super::tree::Taxonomy;
use super::types::TaxonomyNode;
use super::TaxonomyError;

/// Root of the generated Clinical Overview.
pub const CLINICAL_OVERVIEW: &str = "2.5";

/// (id, title, hints). Parents precede children; a node's parent is its id minus the last segment.
const CTD_NODES: &[(&str, &str, &[&str])] = &[
    ("1", "Administrative Information and Prescribing Information", &["application form", "cover letter", "labeling", "package insert", "regional"]),
    ("1.1", "Comprehensive Table of Contents", &["table of contents"]),
    ("1.2", "Application Form", &["application form", "form 356h"]),
    ("1.3", "Product Information", &["prescribing information", "labeling", "package leaflet", "SmPC"]),
    ("1.4", "Information about the Experts", &["expert curriculum vitae", "expert signature"]),
    ("1.5", "Environmental Risk Assessment", &["environmental risk", "ecotoxicity"]),

    ("2", "Common Technical Document Summaries", &["summary", "overview", "critical assessment"]),
    ("2.1", "CTD Table of Contents", &["table of contents"]),
    ("2.2", "CTD Introduction", &["introduction", "pharmacological class", "proposed indication"]),
    ("2.3", "Quality Overall Summary", &["quality summary", "CMC summary"]),
    ("2.4", "Nonclinical Overview", &["nonclinical overview", "animal data assessment"]),
    ("2.5", "Clinical Overview", &["clinical overview", "benefit-risk", "critical analysis of clinical data"]),
    ("2.5.1", "Product Development Rationale", &["development rationale", "unmet need", "regulatory guidance followed"]),
    ("2.5.2", "Overview of Biopharmaceutics", &["formulation", "bioavailability", "bioequivalence", "food effect"]),
    ("2.5.3", "Overview of Clinical Pharmacology", &["pharmacokinetics", "pharmacodynamics", "drug interactions", "metabolism"]),
    ("2.5.4", "Overview of Efficacy", &["efficacy", "primary endpoint", "dose response"]),
    ("2.5.5", "Overview of Safety", &["adverse events", "safety profile", "tolerability", "deaths"]),
    ("2.5.6", "Benefits and Risks Conclusions", &["benefit-risk conclusion"]),
    ("2.5.6.1", "Therapeutic Context", &["therapeutic context"]),
    ("2.5.6.1.1", "Disease or Condition", &["epidemiology", "natural history", "disease burden"]),
    ("2.5.6.1.2", "Current Therapies", &["standard of care", "treatment guidelines", "available therapies"]),
    ("2.5.6.2", "Benefits", &["clinical benefit", "favourable effects"]),
    ("2.5.6.3", "Risks", &["unfavourable effects", "important risks", "uncertainties"]),
    ("2.5.6.4", "Benefit-Risk Assessment", &["benefit-risk balance", "risk minimisation"]),
    ("2.5.7", "Literature References", &["references", "bibliography"]),
    ("2.6", "Nonclinical Written and Tabulated Summaries", &["nonclinical summary", "toxicology tables"]),
    ("2.7", "Clinical Summary", &["clinical summary", "tabulated clinical data"]),
    ("2.7.1", "Summary of Biopharmaceutic Studies and Associated Analytical Methods", &["biopharmaceutic summary"]),
    ("2.7.2", "Summary of Clinical Pharmacology Studies", &["clinical pharmacology summary"]),
    ("2.7.3", "Summary of Clinical Efficacy", &["efficacy summary"]),
    ("2.7.4", "Summary of Clinical Safety", &["safety summary", "integrated safety"]),
    ("2.7.5", "Literature References", &["references"]),
    ("2.7.6", "Synopses of Individual Studies", &["study synopsis"]),

    ("3", "Quality", &["chemistry manufacturing controls", "CMC", "specification", "stability", "batch analysis"]),
    ("3.1", "Table of Contents of Module 3", &["table of contents"]),
    ("3.2", "Body of Data", &["drug substance", "drug product", "manufacturing process", "stability data"]),
    ("3.3", "Literature References", &["references"]),

    ("4", "Nonclinical Study Reports", &["animal study", "in vivo", "in vitro", "toxicology", "GLP"]),
    ("4.1", "Table of Contents of Module 4", &["table of contents"]),
    ("4.2", "Study Reports", &["nonclinical study report"]),
    ("4.2.1", "Pharmacology", &["primary pharmacodynamics", "safety pharmacology", "receptor binding"]),
    ("4.2.2", "Pharmacokinetics", &["absorption", "distribution", "animal metabolism", "excretion"]),
    ("4.2.3", "Toxicology", &["single dose toxicity", "repeat dose toxicity", "genotoxicity", "carcinogenicity", "reproductive toxicity"]),
    ("4.3", "Literature References", &["references"]),

    ("5", "Clinical Study Reports", &["clinical trial", "human study", "patients", "randomized", "case report"]),
    ("5.1", "Table of Contents of Module 5", &["table of contents"]),
    ("5.2", "Tabular Listing of All Clinical Studies", &["study listing", "tabular listing"]),
    ("5.3", "Clinical Study Reports", &["clinical study report", "CSR"]),
    ("5.3.1", "Reports of Biopharmaceutic Studies", &["bioavailability", "bioequivalence", "formulation comparison"]),
    ("5.3.1.1", "Bioavailability (BA) Study Reports", &["absolute bioavailability", "relative bioavailability", "food effect"]),
    ("5.3.1.2", "Comparative BA and Bioequivalence (BE) Study Reports", &["bioequivalence", "generic comparison", "90% confidence interval"]),
    ("5.3.1.3", "In Vitro-In Vivo Correlation Study Reports", &["IVIVC", "dissolution correlation"]),
    ("5.3.1.4", "Reports of Bioanalytical and Analytical Methods for Human Studies", &["assay validation", "LC-MS/MS", "bioanalytical method"]),
    ("5.3.2", "Reports of Studies Pertinent to Pharmacokinetics Using Human Biomaterials", &["human biomaterials", "in vitro metabolism"]),
    ("5.3.2.1", "Plasma Protein Binding Study Reports", &["protein binding", "plasma binding"]),
    ("5.3.2.2", "Reports of Hepatic Metabolism and Drug Interaction Studies", &["CYP450", "hepatocytes", "liver microsomes", "enzyme inhibition"]),
    ("5.3.2.3", "Reports of Studies Using Other Human Biomaterials", &["transporter", "human tissue"]),
    ("5.3.3", "Reports of Human Pharmacokinetic (PK) Studies", &["pharmacokinetics", "Cmax", "AUC", "half-life"]),
    ("5.3.3.1", "Healthy Subject PK and Initial Tolerability Study Reports", &["healthy volunteers", "first-in-human", "single ascending dose"]),
    ("5.3.3.2", "Patient PK and Initial Tolerability Study Reports", &["patient pharmacokinetics", "multiple ascending dose"]),
    ("5.3.3.3", "Intrinsic Factor PK Study Reports", &["renal impairment", "hepatic impairment", "elderly", "pediatric"]),
    ("5.3.3.4", "Extrinsic Factor PK Study Reports", &["drug-drug interaction", "smoking", "alcohol"]),
    ("5.3.3.5", "Population PK Study Reports", &["population pharmacokinetics", "NONMEM", "covariate analysis"]),
    ("5.3.4", "Reports of Human Pharmacodynamic (PD) Studies", &["pharmacodynamics", "biomarker", "exposure-response"]),
    ("5.3.4.1", "Healthy Subject PD and PK/PD Study Reports", &["healthy subject pharmacodynamics", "QT study"]),
    ("5.3.4.2", "Patient PD and PK/PD Study Reports", &["patient pharmacodynamics", "dose-response"]),
    ("5.3.5", "Reports of Efficacy and Safety Studies", &["efficacy", "safety", "phase 3", "pivotal trial"]),
    ("5.3.5.1", "Study Reports of Controlled Clinical Studies Pertinent to the Claimed Indication", &["randomized controlled trial", "placebo-controlled", "double-blind"]),
    ("5.3.5.2", "Study Reports of Uncontrolled Clinical Studies", &["open-label", "single-arm", "extension study"]),
    ("5.3.5.3", "Reports of Analyses of Data from More Than One Study", &["meta-analysis", "pooled analysis", "integrated summary"]),
    ("5.3.5.4", "Other Clinical Study Reports", &["investigator-initiated", "exploratory study"]),
    ("5.3.6", "Reports of Post-Marketing Experience", &["post-marketing", "pharmacovigilance", "real-world evidence", "PSUR"]),
    ("5.3.7", "Case Report Forms and Individual Patient Listings", &["case report form", "patient listings"]),
    ("5.4", "Literature References", &["references", "published literature"]),
];

/// The embedded CTD taxonomy.
pub fn ctd_taxonomy() -> Result<Taxonomy, TaxonomyError> {
    let mut nodes: Vec<TaxonomyNode> = CTD_NODES
        .iter()
        .map(|(id, title, hints)| TaxonomyNode::new(*id, *title).with_hints(hints))
        .collect();

    let positions: std::collections::HashMap<&str, usize> = CTD_NODES
        .iter()
        .enumerate()
        .map(|(i, (id, _, _))| (*id, i))
        .collect();

    for (id, _, _) in CTD_NODES {
        if let Some((parent, _)) = id.rsplit_once('.') {
            let Some(&p) = positions.get(parent) else {
                return Err(TaxonomyError::Orphan(id.to_string()));
            };
            nodes[p].children.push(id.to_string());
        }
    }

    Taxonomy::new(nodes)
}

/// Content dependencies between Clinical Overview sections.
pub fn clinical_overview_dependencies() -> DependencyGraph {
    let edges: &[(&str, &[&str])] = &[
        ("2.5", &[]),
        ("2.5.1", &[]),
        ("2.5.2", &["2.5.1"]),
        ("2.5.3", &["2.5.2"]),
        ("2.5.4", &["2.5.3"]),
        ("2.5.5", &["2.5.3", "2.5.4"]),
        ("2.5.6", &["2.5.4", "2.5.5"]),
        ("2.5.6.1", &["2.5.1", "2.5.6"]),
        ("2.5.6.1.1", &["2.5.6.1"]),
        ("2.5.6.1.2", &["2.5.6.1"]),
        ("2.5.6.2", &["2.5.4", "2.5.6"]),
        ("2.5.6.3", &["2.5.5", "2.5.6"]),
        ("2.5.6.4", &["2.5.4", "2.5.5", "2.5.6.2", "2.5.6.3", "2.5.6"]),
        ("2.5.7", &[]),
    ];

    edges
        .iter()
        .map(|(node, deps)| {
            (
                node.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        })
        .collect()
}

/// Which Module 5 evidence nodes feed each Clinical Overview section.
/// Unlisted descendants inherit their nearest routed ancestor.
pub fn clinical_overview_evidence_routes() -> EvidenceRoutes {
    const PK_PD: &[&str] = &[
        "5.3.2", "5.3.2.1", "5.3.2.2", "5.3.2.3",
        "5.3.3", "5.3.3.1", "5.3.3.2", "5.3.3.3", "5.3.3.4", "5.3.3.5",
        "5.3.4", "5.3.4.1", "5.3.4.2",
    ];
    const EFFICACY: &[&str] = &["5.3.5", "5.3.5.1", "5.3.5.2", "5.3.5.3", "5.3.5.4"];
    const EFFICACY_AND_POSTMARKETING: &[&str] =
        &["5.3.5", "5.3.5.1", "5.3.5.2", "5.3.5.3", "5.3.5.4", "5.3.6"];

    EvidenceRoutes::new()
        .route(
            "2.5.1",
            &["5.3.1", "5.3.1.1", "5.3.1.2", "5.3.3", "5.3.3.1", "5.3.3.2"],
        )
        .route("2.5.2", &["5.3.1", "5.3.1.1", "5.3.1.2", "5.3.1.3", "5.3.1.4"])
        .route("2.5.3", PK_PD)
        .route("2.5.4", EFFICACY)
        .route("2.5.5", EFFICACY_AND_POSTMARKETING)
        .route("2.5.6", EFFICACY_AND_POSTMARKETING)
        .route("2.5.6.1", EFFICACY)
        .route("2.5.6.2", &["5.3.5", "5.3.5.1", "5.3.5.2", "5.3.5.3"])
        .route("2.5.6.3", &["5.3.5", "5.3.5.1", "5.3.5.2", "5.3.5.3", "5.3.6"])
        .route("2.5.6.4", EFFICACY_AND_POSTMARKETING)
        .route_all("2.5.7")
}
