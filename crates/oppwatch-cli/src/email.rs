//! Email rendering for one new record.

use oppwatch_core::domain::Record;
use oppwatch_core::domain::record::DETECTED_AT_FORMAT;

const REMOTE_LOCATION: &str = "Remote / Not specified";
const NO_DESCRIPTION: &str = "No description available";

pub fn subject(record: &Record) -> String {
    format!("Catalant: {}", record.title())
}

/// HTML body. Every record field is escaped before it is interpolated.
pub fn render_html(record: &Record, dashboard_url: &str) -> String {
    let location = if record.location.trim().is_empty() {
        REMOTE_LOCATION
    } else {
        record.location.as_str()
    };
    let description = if record.description.trim().is_empty() {
        NO_DESCRIPTION.to_string()
    } else {
        escape(&record.description).replace('\n', "<br>")
    };
    let badge = if record.is_new() {
        "<span class='badge'>New Project</span>"
    } else {
        ""
    };
    let categories = if record.categories.is_empty() {
        String::new()
    } else {
        let items: Vec<String> = record
            .categories
            .iter()
            .map(|c| format!("&bull; {}", escape(c)))
            .collect();
        format!(
            "<div style='margin: 10px 0;'><strong>Categories:</strong><br>{}</div>",
            items.join("<br>")
        )
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<style>
  body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
  .container {{ max-width: 800px; margin: 0 auto; padding: 20px; }}
  .header {{ background-color: #4CAF50; color: white; padding: 15px; border-radius: 5px 5px 0 0; }}
  .content {{ padding: 20px; border: 1px solid #ddd; border-top: none; }}
  .badge {{ background-color: #e74c3c; color: white; padding: 5px 10px; border-radius: 3px; font-size: 12px; }}
  .info {{ background-color: #f8f9fa; padding: 15px; border-radius: 5px; margin: 15px 0; }}
  .description {{ padding: 15px; border-left: 4px solid #4CAF50; margin: 15px 0; }}
  .button {{ display: inline-block; background-color: #4CAF50; color: white; padding: 12px 24px; text-decoration: none; border-radius: 5px; }}
</style>
</head>
<body>
<div class="container">
  <div class="header"><h2 style="margin: 0;">New Project on Catalant</h2></div>
  <div class="content">
    <h3>{title}</h3>
    {badge}
    <div class="info">
      <p><strong>Location:</strong> {location}</p>
      <p><strong>Posted:</strong> {posted} ago</p>
      <p><strong>Project ID:</strong> {id}</p>
      <p><strong>Detected:</strong> {detected}</p>
    </div>
    {categories}
    <div class="description">
      <h4 style="margin-top: 0;">Project Description:</h4>
      <p>{description}</p>
    </div>
    <p style="text-align: center;"><a class="button" href="{url}">View on Catalant Dashboard</a></p>
  </div>
  <p style="font-size: 12px; color: #777;">Automated notification from the Catalant project monitor</p>
</div>
</body>
</html>
"#,
        title = escape(record.title()),
        location = escape(location),
        posted = escape(&record.time_posted),
        id = escape(record.id()),
        detected = record.detected_at().format(DETECTED_AT_FORMAT),
        url = escape(dashboard_url),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use oppwatch_core::domain::RecordStatus;
    use rstest::rstest;

    fn record() -> Record {
        let detected = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        Record::new("abc123", "Pricing <strategy> & ops", detected).unwrap()
    }

    const URL: &str = "https://app.example.com/dashboard/";

    #[test]
    fn subject_uses_the_title() {
        assert_eq!(subject(&record()), "Catalant: Pricing <strategy> & ops");
    }

    #[test]
    fn fields_are_escaped() {
        let html = render_html(&record(), URL);

        assert!(html.contains("Pricing &lt;strategy&gt; &amp; ops"));
        assert!(!html.contains("<strategy>"));
    }

    #[test]
    fn blank_location_reads_remote() {
        let html = render_html(&record(), URL);

        assert!(html.contains("Remote / Not specified"));
        assert!(html.contains("No description available"));
        assert!(html.contains("2024-06-01 09:30:00"));
    }

    #[test]
    fn description_newlines_become_breaks() {
        let mut r = record();
        r.description = "line one\nline two".into();
        r.categories = vec!["Finance".into(), "Strategy".into()];

        let html = render_html(&r, URL);

        assert!(html.contains("line one<br>line two"));
        assert!(html.contains("&bull; Finance<br>&bull; Strategy"));
    }

    #[rstest]
    #[case::posted(RecordStatus::Posted, false)]
    #[case::new(RecordStatus::New, true)]
    fn badge_only_for_new(#[case] status: RecordStatus, #[case] expected: bool) {
        let mut r = record();
        r.status = status;

        let html = render_html(&r, URL);

        assert_eq!(html.contains("class='badge'"), expected);
    }
}
