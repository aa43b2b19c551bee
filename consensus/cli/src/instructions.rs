//! Prompt text for memo editing runs
//!
//! The core pipeline is prompt-agnostic; everything it sends to a model
//! beyond the document itself comes from here. Each memo section gets the
//! shared editing prompt, specialised by section name, plus a short list of
//! section-specific focus points where one exists.

/// Section name used when none is given
pub const GENERAL_SECTION: &str = "General";

/// Known investment memo sections with their focus points
pub const MEMO_SECTIONS: [(&str, &str); 10] = [
    (
        "Customer Discovery",
        "- Name the target customer segments and the pain each one feels\n\
         - Surface the strongest interview insights and validation points\n\
         - Lead with evidence of product-market fit\n\
         - Keep customer quotes only where they carry weight\n\
         - Tie customer needs directly to the solution",
    ),
    (
        "Product and Technology",
        "- Explain the core product without jargon\n\
         - Call out the key technical advantages\n\
         - Make technical moats and barriers to entry explicit\n\
         - Summarise the roadmap in a few lines\n\
         - Connect capabilities to market needs",
    ),
    (
        "Market Research",
        "- State TAM, SAM and SOM with credible sources\n\
         - Keep only the trends and growth drivers that matter\n\
         - Cut statistics that do not support the thesis\n\
         - Say why the timing is right\n\
         - Keep every market claim backed by data",
    ),
    (
        "Competitor Analysis",
        "- Give a clear overview of the competitive landscape\n\
         - Highlight differentiation and competitive advantages\n\
         - Focus on the most relevant direct and indirect competitors\n\
         - Analyse moats and barriers to entry\n\
         - Assess competitive threats honestly",
    ),
    (
        "GTM and Partners",
        "- Lay out an executable go-to-market strategy\n\
         - Highlight channel strategy and partnership opportunities\n\
         - Keep only the most strategic partnerships\n\
         - Present realistic customer acquisition plans\n\
         - Include sales cycle and key conversion metrics",
    ),
    (
        "Revenue Model",
        "- State the primary revenue streams\n\
         - Show unit economics and pricing strategy\n\
         - Include LTV, CAC and payback period where available\n\
         - Show the path to scalable revenue\n\
         - Address revenue risks and mitigations",
    ),
    (
        "Operating Metrics",
        "- Keep the KPIs that matter most for this business\n\
         - Present clear operational benchmarks\n\
         - Drop metrics that do not inform the decision\n\
         - Link metrics to business success and returns\n\
         - Compare against industry standards",
    ),
    (
        "Financial Modelling",
        "- Present projections with their key assumptions\n\
         - Show the path to profitability with realistic milestones\n\
         - Cover cash flow and capital efficiency\n\
         - Address financial risks and sensitivities\n\
         - Keep the metrics that fit this business model",
    ),
    (
        "Team and Talents",
        "- Highlight the founders' relevant expertise and track record\n\
         - Identify skill gaps and hiring priorities\n\
         - Describe team structure briefly\n\
         - Explain why this team fits this venture\n\
         - Address team risks and mitigations",
    ),
    (
        "Legal and IP",
        "- Describe key IP assets and how they are protected\n\
         - Cover regulatory considerations and compliance\n\
         - Identify critical legal risks and mitigations\n\
         - Make the IP advantage explicit\n\
         - Summarise legal structure and governance",
    ),
];

/// Resolve a section name case-insensitively to its canonical spelling
pub fn find_section(name: &str) -> Option<&'static str> {
    MEMO_SECTIONS
        .iter()
        .map(|(section, _)| *section)
        .find(|section| section.eq_ignore_ascii_case(name.trim()))
}

fn focus_points(section: &str) -> Option<&'static str> {
    MEMO_SECTIONS
        .iter()
        .find(|(name, _)| *name == section)
        .map(|(_, focus)| *focus)
}

/// System prompt for the fan-out models
pub fn edit_instructions(section: &str) -> String {
    let mut prompt = format!(
        "You are an expert editor of venture capital investment memos. Edit the \
         markdown you are given so that it is succinct and readable, in the style \
         of memos written at top-tier firms.\n\n\
         The text is the {section} SECTION of a market report. Turn it into an \
         excellent {section} section of an investment memo, not a complete memo.\n\n\
         Focus on:\n\
         1. Removing unnecessary detail while keeping key insights\n\
         2. Sharpening the analysis and reasoning\n\
         3. Improving clarity and readability\n\
         4. Keeping a professional, analytical tone\n\
         5. Putting the information that drives the investment decision first\n\
         6. Using the structure expected of a {section} section"
    );

    if let Some(focus) = focus_points(section) {
        prompt.push_str(&format!(
            "\n\nFor a {section} section, focus on:\n{focus}"
        ));
    }
    prompt
}

/// System prompt for the consolidation model
pub fn consolidation_instructions(section: &str) -> String {
    format!(
        "You are a master editor of venture capital investment memos. You have \
         several edited versions of the same memo section, each produced by a \
         different model.\n\n\
         The original text is the {section} SECTION of a market report. Produce \
         one final version that works as an excellent {section} section, not a \
         complete memo. The final version should:\n\
         1. Combine the best edits and insights from every version\n\
         2. Prefer edits that several versions agree on\n\
         3. Be as concise, clear and compelling as possible\n\
         4. Follow the style of top-tier venture firms\n\
         5. Concentrate on what makes a {section} section excellent"
    )
}

/// Closing line of the consolidation prompt
pub fn synthesis_directive(section: &str) -> String {
    format!(
        "Based on these versions, create the optimal final version that \
         incorporates the best elements from each to create an excellent \
         {section} section for a venture capital memo."
    )
}
