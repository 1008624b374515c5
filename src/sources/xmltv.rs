//! Streaming XMLTV guide filter.
//!
//! Walks the source document one event at a time with quick-xml and decodes
//! one `<channel>`/`<programme>` element at a time, keeping only entries
//! whose channel identifier is in the supplied known set. The full foreign
//! document is never held in memory as a tree. A decode error on any
//! element is fatal for the whole call.

use std::collections::HashSet;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::errors::GuideError;
use crate::models::{
    EpisodeNum, Guide, GuideChannel, GuideProgramme, Icon, Localized, PreviouslyShown, Rating,
    Subtitles,
};

/// Declaration and doctype emitted ahead of every rendered guide,
/// independent of whatever declaration the source document used.
const GUIDE_PROLOGUE: &str =
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><!DOCTYPE tv SYSTEM \"xmltv.dtd\">";

/// Filter a guide document down to the entries whose channel identifier is
/// a member of `known_ids`.
pub fn filter_guide(content: &str, known_ids: &HashSet<String>) -> Result<Guide, GuideError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut guide = Guide::default();
    let mut channels_seen = 0usize;
    let mut programmes_seen = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"tv" => read_tv_attributes(&e, &mut guide)?,
                b"channel" => {
                    channels_seen += 1;
                    let channel = read_channel(&mut reader, &e)?;
                    if known_ids.contains(&channel.id) {
                        guide.channels.push(channel);
                    }
                }
                b"programme" => {
                    programmes_seen += 1;
                    let programme = read_programme(&mut reader, &e)?;
                    if known_ids.contains(&programme.channel) {
                        guide.programmes.push(programme);
                    }
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"tv" => read_tv_attributes(&e, &mut guide)?,
                b"channel" => {
                    channels_seen += 1;
                    let channel = GuideChannel {
                        id: attr_value(&e, b"id")?.unwrap_or_default(),
                        ..Default::default()
                    };
                    if known_ids.contains(&channel.id) {
                        guide.channels.push(channel);
                    }
                }
                b"programme" => {
                    programmes_seen += 1;
                    let programme = programme_from_attrs(&e)?;
                    if known_ids.contains(&programme.channel) {
                        guide.programmes.push(programme);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    debug!(
        channels_seen,
        channels_kept = guide.channels.len(),
        programmes_seen,
        programmes_kept = guide.programmes.len(),
        "filtered guide document"
    );

    Ok(guide)
}

fn read_tv_attributes(e: &BytesStart, guide: &mut Guide) -> Result<(), GuideError> {
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"date" => guide.date = Some(value),
            b"source-info-url" => guide.source_info_url = Some(value),
            b"source-info-name" => guide.source_info_name = Some(value),
            b"source-data-url" => guide.source_data_url = Some(value),
            b"generator-info-name" => guide.generator_info_name = Some(value),
            b"generator-info-url" => guide.generator_info_url = Some(value),
            _ => {}
        }
    }
    Ok(())
}

fn attr_value(e: &BytesStart, name: &[u8]) -> Result<Option<String>, GuideError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn localized(e: &BytesStart, value: String) -> Result<Localized, GuideError> {
    Ok(Localized {
        value,
        lang: attr_value(e, b"lang")?,
    })
}

fn icon_from_attrs(e: &BytesStart) -> Result<Icon, GuideError> {
    Ok(Icon {
        src: attr_value(e, b"src")?.unwrap_or_default(),
        width: attr_value(e, b"width")?,
        height: attr_value(e, b"height")?,
    })
}

fn read_channel(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<GuideChannel, GuideError> {
    let mut channel = GuideChannel {
        id: attr_value(start, b"id")?.unwrap_or_default(),
        ..Default::default()
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"display-name" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    channel.display_names.push(localized(&e, value)?);
                }
                b"icon" => {
                    channel.icons.push(icon_from_attrs(&e)?);
                    reader.read_to_end(e.name())?;
                }
                b"url" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    channel.urls.push(value);
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => {
                if e.name().as_ref() == b"icon" {
                    channel.icons.push(icon_from_attrs(&e)?);
                }
            }
            Event::End(e) if e.name().as_ref() == b"channel" => return Ok(channel),
            Event::Eof => {
                return Err(GuideError::UnexpectedEof {
                    element: "channel".to_string(),
                })
            }
            _ => {}
        }
    }
}

fn programme_from_attrs(e: &BytesStart) -> Result<GuideProgramme, GuideError> {
    Ok(GuideProgramme {
        start: attr_value(e, b"start")?.unwrap_or_default(),
        stop: attr_value(e, b"stop")?,
        channel: attr_value(e, b"channel")?.unwrap_or_default(),
        ..Default::default()
    })
}

fn read_programme(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<GuideProgramme, GuideError> {
    let mut programme = programme_from_attrs(start)?;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"title" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.titles.push(localized(&e, value)?);
                }
                b"sub-title" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.sub_titles.push(localized(&e, value)?);
                }
                b"desc" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.descs.push(localized(&e, value)?);
                }
                b"date" => {
                    programme.date = Some(reader.read_text(e.name())?.trim().to_string());
                }
                b"category" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.categories.push(localized(&e, value)?);
                }
                b"language" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.language = Some(localized(&e, value)?);
                }
                b"orig-language" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.orig_language = Some(localized(&e, value)?);
                }
                b"icon" => {
                    programme.icons.push(icon_from_attrs(&e)?);
                    reader.read_to_end(e.name())?;
                }
                b"url" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.urls.push(value);
                }
                b"country" => {
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.countries.push(localized(&e, value)?);
                }
                b"episode-num" => {
                    let system = attr_value(&e, b"system")?;
                    let value = reader.read_text(e.name())?.trim().to_string();
                    programme.episode_nums.push(EpisodeNum { system, value });
                }
                b"previously-shown" => {
                    programme.previously_shown = Some(PreviouslyShown {
                        start: attr_value(&e, b"start")?,
                        channel: attr_value(&e, b"channel")?,
                    });
                    reader.read_to_end(e.name())?;
                }
                b"premiere" => {
                    programme.premiere = true;
                    reader.read_to_end(e.name())?;
                }
                b"new" => {
                    programme.new = true;
                    reader.read_to_end(e.name())?;
                }
                b"subtitles" => {
                    programme.subtitles.push(Subtitles {
                        kind: attr_value(&e, b"type")?,
                    });
                    reader.read_to_end(e.name())?;
                }
                b"rating" => {
                    programme.ratings.push(read_rating(reader, &e)?);
                }
                b"star-rating" => {
                    programme.star_ratings.push(read_rating(reader, &e)?);
                }
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"icon" => programme.icons.push(icon_from_attrs(&e)?),
                b"previously-shown" => {
                    programme.previously_shown = Some(PreviouslyShown {
                        start: attr_value(&e, b"start")?,
                        channel: attr_value(&e, b"channel")?,
                    });
                }
                b"premiere" => programme.premiere = true,
                b"new" => programme.new = true,
                b"subtitles" => {
                    programme.subtitles.push(Subtitles {
                        kind: attr_value(&e, b"type")?,
                    });
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"programme" => return Ok(programme),
            Event::Eof => {
                return Err(GuideError::UnexpectedEof {
                    element: "programme".to_string(),
                })
            }
            _ => {}
        }
    }
}

fn read_rating(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Rating, GuideError> {
    let mut rating = Rating {
        system: attr_value(start, b"system")?,
        value: String::new(),
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.name().as_ref() == b"value" {
                    rating.value = reader.read_text(e.name())?.trim().to_string();
                } else {
                    reader.read_to_end(e.name())?;
                }
            }
            Event::End(e) if e.name() == start.name() => return Ok(rating),
            Event::Eof => {
                return Err(GuideError::UnexpectedEof {
                    element: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                })
            }
            _ => {}
        }
    }
}

impl Guide {
    /// Serialize the guide, prefixed with the standard XML declaration and
    /// the XMLTV doctype.
    pub fn to_xml(&self) -> Result<String, GuideError> {
        let mut writer = Writer::new(Vec::new());

        let header = [
            ("date", &self.date),
            ("source-info-url", &self.source_info_url),
            ("source-info-name", &self.source_info_name),
            ("source-data-url", &self.source_data_url),
            ("generator-info-name", &self.generator_info_name),
            ("generator-info-url", &self.generator_info_url),
        ];

        let mut tv = writer.create_element("tv");
        for (key, value) in header {
            if let Some(value) = value {
                tv = tv.with_attribute((key, value.as_str()));
            }
        }
        tv.write_inner_content(|writer| -> Result<(), GuideError> {
            for channel in &self.channels {
                write_channel(writer, channel)?;
            }
            for programme in &self.programmes {
                write_programme(writer, programme)?;
            }
            Ok(())
        })?;

        let body = writer.into_inner();
        Ok(format!("{}{}", GUIDE_PROLOGUE, String::from_utf8_lossy(&body)))
    }
}

fn write_localized(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    text: &Localized,
) -> Result<(), GuideError> {
    let mut element = writer.create_element(tag);
    if let Some(lang) = &text.lang {
        element = element.with_attribute(("lang", lang.as_str()));
    }
    element.write_text_content(BytesText::new(&text.value))?;
    Ok(())
}

fn write_icon(writer: &mut Writer<Vec<u8>>, icon: &Icon) -> Result<(), GuideError> {
    let mut element = writer
        .create_element("icon")
        .with_attribute(("src", icon.src.as_str()));
    if let Some(width) = &icon.width {
        element = element.with_attribute(("width", width.as_str()));
    }
    if let Some(height) = &icon.height {
        element = element.with_attribute(("height", height.as_str()));
    }
    element.write_empty()?;
    Ok(())
}

fn write_rating(writer: &mut Writer<Vec<u8>>, tag: &str, rating: &Rating) -> Result<(), GuideError> {
    let mut element = writer.create_element(tag);
    if let Some(system) = &rating.system {
        element = element.with_attribute(("system", system.as_str()));
    }
    element.write_inner_content(|writer| -> Result<(), GuideError> {
        writer
            .create_element("value")
            .write_text_content(BytesText::new(&rating.value))?;
        Ok(())
    })?;
    Ok(())
}

fn write_channel(writer: &mut Writer<Vec<u8>>, channel: &GuideChannel) -> Result<(), GuideError> {
    writer
        .create_element("channel")
        .with_attribute(("id", channel.id.as_str()))
        .write_inner_content(|writer| -> Result<(), GuideError> {
            for name in &channel.display_names {
                write_localized(writer, "display-name", name)?;
            }
            for icon in &channel.icons {
                write_icon(writer, icon)?;
            }
            for url in &channel.urls {
                writer
                    .create_element("url")
                    .write_text_content(BytesText::new(url))?;
            }
            Ok(())
        })?;
    Ok(())
}

fn write_programme(
    writer: &mut Writer<Vec<u8>>,
    programme: &GuideProgramme,
) -> Result<(), GuideError> {
    let mut element = writer
        .create_element("programme")
        .with_attribute(("start", programme.start.as_str()));
    if let Some(stop) = &programme.stop {
        element = element.with_attribute(("stop", stop.as_str()));
    }
    element = element.with_attribute(("channel", programme.channel.as_str()));

    element.write_inner_content(|writer| -> Result<(), GuideError> {
        for title in &programme.titles {
            write_localized(writer, "title", title)?;
        }
        for sub_title in &programme.sub_titles {
            write_localized(writer, "sub-title", sub_title)?;
        }
        for desc in &programme.descs {
            write_localized(writer, "desc", desc)?;
        }
        if let Some(date) = &programme.date {
            writer
                .create_element("date")
                .write_text_content(BytesText::new(date))?;
        }
        for category in &programme.categories {
            write_localized(writer, "category", category)?;
        }
        if let Some(language) = &programme.language {
            write_localized(writer, "language", language)?;
        }
        if let Some(orig_language) = &programme.orig_language {
            write_localized(writer, "orig-language", orig_language)?;
        }
        for icon in &programme.icons {
            write_icon(writer, icon)?;
        }
        for url in &programme.urls {
            writer
                .create_element("url")
                .write_text_content(BytesText::new(url))?;
        }
        for country in &programme.countries {
            write_localized(writer, "country", country)?;
        }
        for episode_num in &programme.episode_nums {
            let mut element = writer.create_element("episode-num");
            if let Some(system) = &episode_num.system {
                element = element.with_attribute(("system", system.as_str()));
            }
            element.write_text_content(BytesText::new(&episode_num.value))?;
        }
        if let Some(shown) = &programme.previously_shown {
            let mut element = writer.create_element("previously-shown");
            if let Some(start) = &shown.start {
                element = element.with_attribute(("start", start.as_str()));
            }
            if let Some(channel) = &shown.channel {
                element = element.with_attribute(("channel", channel.as_str()));
            }
            element.write_empty()?;
        }
        if programme.premiere {
            writer.create_element("premiere").write_empty()?;
        }
        if programme.new {
            writer.create_element("new").write_empty()?;
        }
        for subtitles in &programme.subtitles {
            let mut element = writer.create_element("subtitles");
            if let Some(kind) = &subtitles.kind {
                element = element.with_attribute(("type", kind.as_str()));
            }
            element.write_empty()?;
        }
        for rating in &programme.ratings {
            write_rating(writer, "rating", rating)?;
        }
        for star_rating in &programme.star_ratings {
            write_rating(writer, "star-rating", star_rating)?;
        }
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<!DOCTYPE tv SYSTEM "xmltv.dtd">
<tv date="20260807" source-info-name="upstream" generator-info-name="gen">
  <channel id="one.example">
    <display-name lang="en">One</display-name>
    <icon src="http://example.com/one.png"/>
  </channel>
  <channel id="two.example">
    <display-name>Two</display-name>
  </channel>
  <channel id="ghost.example">
    <display-name>Ghost</display-name>
  </channel>
  <programme start="20260807060000 +0000" stop="20260807070000 +0000" channel="one.example">
    <title lang="en">Morning News</title>
    <desc lang="en">Headlines &amp; weather.</desc>
    <category lang="en">News</category>
    <episode-num system="onscreen">S1E1</episode-num>
    <rating system="VCHIP"><value>TV-PG</value></rating>
    <new/>
  </programme>
  <programme start="20260807070000 +0000" channel="two.example">
    <title>Other Show</title>
    <credits><presenter>Someone</presenter></credits>
  </programme>
  <programme start="20260807080000 +0000" channel="ghost.example">
    <title>Ghost Show</title>
  </programme>
</tv>
"#;

    fn known(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn keeps_only_known_identifiers() {
        let guide = filter_guide(SAMPLE, &known(&["one.example", "two.example"])).unwrap();

        assert_eq!(guide.channels.len(), 2);
        assert_eq!(guide.channels[0].id, "one.example");
        assert_eq!(guide.channels[1].id, "two.example");
        assert_eq!(guide.programmes.len(), 2);
        assert!(guide.programmes.iter().all(|p| p.channel != "ghost.example"));
    }

    #[test]
    fn captures_header_attributes_verbatim() {
        let guide = filter_guide(SAMPLE, &known(&["one.example"])).unwrap();
        assert_eq!(guide.date.as_deref(), Some("20260807"));
        assert_eq!(guide.source_info_name.as_deref(), Some("upstream"));
        assert_eq!(guide.generator_info_name.as_deref(), Some("gen"));
        assert_eq!(guide.source_info_url, None);
    }

    #[test]
    fn decodes_programme_fields() {
        let guide = filter_guide(SAMPLE, &known(&["one.example"])).unwrap();
        let programme = &guide.programmes[0];

        assert_eq!(programme.start, "20260807060000 +0000");
        assert_eq!(programme.stop.as_deref(), Some("20260807070000 +0000"));
        assert_eq!(programme.titles[0].value, "Morning News");
        assert_eq!(programme.titles[0].lang.as_deref(), Some("en"));
        assert_eq!(programme.descs[0].value, "Headlines & weather.");
        assert_eq!(programme.episode_nums[0].system.as_deref(), Some("onscreen"));
        assert_eq!(programme.episode_nums[0].value, "S1E1");
        assert_eq!(programme.ratings[0].value, "TV-PG");
        assert!(programme.new);
    }

    #[test]
    fn unknown_sub_elements_are_skipped() {
        let guide = filter_guide(SAMPLE, &known(&["two.example"])).unwrap();
        assert_eq!(guide.programmes.len(), 1);
        assert_eq!(guide.programmes[0].titles[0].value, "Other Show");
    }

    #[test]
    fn empty_known_set_keeps_nothing() {
        let guide = filter_guide(SAMPLE, &known(&[])).unwrap();
        assert!(guide.channels.is_empty());
        assert!(guide.programmes.is_empty());
        assert_eq!(guide.date.as_deref(), Some("20260807"));
    }

    #[test]
    fn mismatched_tags_are_fatal() {
        let err = filter_guide(
            "<tv><channel id=\"x\"><display-name>Oops</tv>",
            &known(&["x"]),
        )
        .unwrap_err();
        assert!(matches!(err, GuideError::Xml(_)));
    }

    #[test]
    fn truncated_element_is_fatal() {
        // Depending on where the document is cut this surfaces as either an
        // ill-formed XML error or our own unexpected-EOF error; both abort
        // the filter call with no partial result.
        assert!(filter_guide(
            "<tv><programme start=\"0\" channel=\"x\"><title>T</title>",
            &known(&["x"]),
        )
        .is_err());
    }

    #[test]
    fn rendered_guide_carries_standard_prologue() {
        let guide = filter_guide(SAMPLE, &known(&["one.example"])).unwrap();
        let xml = guide.to_xml().unwrap();

        assert!(xml.starts_with(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><!DOCTYPE tv SYSTEM \"xmltv.dtd\">"
        ));
        assert!(xml.contains("<tv date=\"20260807\""));
        assert!(xml.contains("<channel id=\"one.example\">"));
        assert!(xml.contains("<display-name lang=\"en\">One</display-name>"));
        assert!(xml.contains("<icon src=\"http://example.com/one.png\"/>"));
        assert!(xml.contains("Headlines &amp; weather."));
        assert!(xml.contains("<rating system=\"VCHIP\"><value>TV-PG</value></rating>"));
        assert!(xml.contains("<new/>"));
        assert!(!xml.contains("ghost.example"));
    }

    #[test]
    fn round_trip_preserves_filtered_entries() {
        let guide = filter_guide(SAMPLE, &known(&["one.example", "two.example"])).unwrap();
        let xml = guide.to_xml().unwrap();
        let reparsed = filter_guide(&xml, &known(&["one.example", "two.example"])).unwrap();

        assert_eq!(reparsed.channels, guide.channels);
        assert_eq!(reparsed.programmes, guide.programmes);
        assert_eq!(reparsed.date, guide.date);
    }
}
